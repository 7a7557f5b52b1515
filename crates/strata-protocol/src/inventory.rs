//! Inventory vectors: (type, hash) pairs naming an advertised or requested item.

use serde::{Deserialize, Serialize};
use strata_blocks::{BlockKind, Hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvType {
    DirBlock,
    AdminBlock,
    EntryCreditBlock,
    FactoidBlock,
    EntryBlock,
    Entry,
    Transaction,
}

impl InvType {
    pub fn block_kind(&self) -> Option<BlockKind> {
        match self {
            InvType::DirBlock => Some(BlockKind::Directory),
            InvType::AdminBlock => Some(BlockKind::Admin),
            InvType::EntryCreditBlock => Some(BlockKind::EntryCredit),
            InvType::FactoidBlock => Some(BlockKind::Factoid),
            InvType::EntryBlock => Some(BlockKind::EntryBlock),
            InvType::Entry => Some(BlockKind::Entry),
            InvType::Transaction => None,
        }
    }
}

impl From<BlockKind> for InvType {
    fn from(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Directory => InvType::DirBlock,
            BlockKind::Admin => InvType::AdminBlock,
            BlockKind::EntryCredit => InvType::EntryCreditBlock,
            BlockKind::Factoid => InvType::FactoidBlock,
            BlockKind::EntryBlock => InvType::EntryBlock,
            BlockKind::Entry => InvType::Entry,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvVect {
    #[serde(rename = "type")]
    pub inv_type: InvType,
    pub hash: Hash,
}

impl InvVect {
    pub fn new(inv_type: InvType, hash: Hash) -> Self {
        Self { inv_type, hash }
    }
}
