//! Application messages carried in `ParcelType::Message` parcels, and the
//! peer share payload of `PeerResponse` parcels.

use serde::{Deserialize, Serialize};
use strata_blocks::{Block, BlockKind, Hash};

use crate::inventory::{InvType, InvVect};
use crate::params::CURRENT_PARAMS;
use crate::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Message {
    /// Advertise directory blocks.
    DirInv { inventory: Vec<InvVect> },
    /// Request any mix of items by inventory vector.
    GetData { inventory: Vec<InvVect> },
    /// Request directory blocks.
    GetDirData { inventory: Vec<InvVect> },
    /// Request the blocks a directory block links to.
    GetNonDirData { inventory: Vec<InvVect> },
    /// Request the entries an entry block lists.
    GetEntryData { inventory: Vec<InvVect> },
    /// Items the serving peer could not find.
    NotFound { inventory: Vec<InvVect> },
    /// Directory block hashes after the first known locator hash, up to
    /// `stop_hash` (zero for no stop).
    GetDirBlocks { locator: Vec<Hash>, stop_hash: Hash },
    /// Catch-up range request for heights `start..=end`.
    DbStateMissing { start: u32, end: u32 },
    /// Highest directory block the sender holds.
    ChainTip { height: u32, key_mr: Hash },

    DirBlock {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    AdminBlock {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    EntryCreditBlock {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    FactoidBlock {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    EntryBlock {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Entry {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    FactoidTx {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl Message {
    /// Empty directory inventory sized for `hint` vectors.
    pub fn dir_inv_with_size_hint(hint: usize) -> Self {
        Message::DirInv {
            inventory: Vec::with_capacity(hint.min(CURRENT_PARAMS.max_inv_per_msg)),
        }
    }

    pub fn from_block(block: &Block) -> Result<Self, ProtocolError> {
        let data = block.marshal()?;
        Ok(match block.kind() {
            BlockKind::Directory => Message::DirBlock { data },
            BlockKind::Admin => Message::AdminBlock { data },
            BlockKind::EntryCredit => Message::EntryCreditBlock { data },
            BlockKind::Factoid => Message::FactoidBlock { data },
            BlockKind::EntryBlock => Message::EntryBlock { data },
            BlockKind::Entry => Message::Entry { data },
        })
    }

    /// Decode a block push. `None` for messages that do not carry a block.
    pub fn to_block(&self) -> Option<Result<Block, ProtocolError>> {
        let (kind, data) = match self {
            Message::DirBlock { data } => (BlockKind::Directory, data),
            Message::AdminBlock { data } => (BlockKind::Admin, data),
            Message::EntryCreditBlock { data } => (BlockKind::EntryCredit, data),
            Message::FactoidBlock { data } => (BlockKind::Factoid, data),
            Message::EntryBlock { data } => (BlockKind::EntryBlock, data),
            Message::Entry { data } => (BlockKind::Entry, data),
            _ => return None,
        };
        Some(Block::unmarshal(kind, data).map_err(ProtocolError::from))
    }

    /// Inventory type of a pushed item.
    pub fn inv_type(&self) -> Option<InvType> {
        Some(match self {
            Message::DirBlock { .. } => InvType::DirBlock,
            Message::AdminBlock { .. } => InvType::AdminBlock,
            Message::EntryCreditBlock { .. } => InvType::EntryCreditBlock,
            Message::FactoidBlock { .. } => InvType::FactoidBlock,
            Message::EntryBlock { .. } => InvType::EntryBlock,
            Message::Entry { .. } => InvType::Entry,
            Message::FactoidTx { .. } => InvType::Transaction,
            _ => return None,
        })
    }

    pub fn command(&self) -> &'static str {
        match self {
            Message::DirInv { .. } => "dirinv",
            Message::GetData { .. } => "getdata",
            Message::GetDirData { .. } => "getdirdata",
            Message::GetNonDirData { .. } => "getnondirdata",
            Message::GetEntryData { .. } => "getentrydata",
            Message::NotFound { .. } => "notfound",
            Message::GetDirBlocks { .. } => "getdirblocks",
            Message::DbStateMissing { .. } => "dbstatemissing",
            Message::ChainTip { .. } => "chaintip",
            Message::DirBlock { .. } => "dirblock",
            Message::AdminBlock { .. } => "adminblock",
            Message::EntryCreditBlock { .. } => "ecblock",
            Message::FactoidBlock { .. } => "factoidblock",
            Message::EntryBlock { .. } => "entryblock",
            Message::Entry { .. } => "entry",
            Message::FactoidTx { .. } => "factoidtx",
        }
    }
}

/// A dialable peer address shared in response to a peer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub address: String,
    pub port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerShare {
    pub peers: Vec<PeerAddress>,
}

// ============================================================================
// Serde helpers
// ============================================================================

/// Serialize/deserialize Vec<u8> as base64 string.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
