//! The closed set of block kinds exchanged between peers.

use serde::{Deserialize, Serialize};

use crate::{
    AdminBlock, DirectoryBlock, Entry, EntryBlock, EntryCreditBlock, FactoidBlock, Hash, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Directory,
    Admin,
    EntryCredit,
    Factoid,
    EntryBlock,
    Entry,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Directory => "directory",
            BlockKind::Admin => "admin",
            BlockKind::EntryCredit => "entry_credit",
            BlockKind::Factoid => "factoid",
            BlockKind::EntryBlock => "entry_block",
            BlockKind::Entry => "entry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Directory(DirectoryBlock),
    Admin(AdminBlock),
    EntryCredit(EntryCreditBlock),
    Factoid(FactoidBlock),
    EntryBlock(EntryBlock),
    Entry(Entry),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Directory(_) => BlockKind::Directory,
            Block::Admin(_) => BlockKind::Admin,
            Block::EntryCredit(_) => BlockKind::EntryCredit,
            Block::Factoid(_) => BlockKind::Factoid,
            Block::EntryBlock(_) => BlockKind::EntryBlock,
            Block::Entry(_) => BlockKind::Entry,
        }
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Block::Directory(b) => b.marshal()?,
            Block::Admin(b) => b.marshal(),
            Block::EntryCredit(b) => b.marshal(),
            Block::Factoid(b) => b.marshal(),
            Block::EntryBlock(b) => b.marshal(),
            Block::Entry(b) => b.marshal(),
        })
    }

    pub fn unmarshal(kind: BlockKind, data: &[u8]) -> Result<Self> {
        Ok(match kind {
            BlockKind::Directory => Block::Directory(DirectoryBlock::unmarshal(data)?),
            BlockKind::Admin => Block::Admin(AdminBlock::unmarshal(data)?),
            BlockKind::EntryCredit => Block::EntryCredit(EntryCreditBlock::unmarshal(data)?),
            BlockKind::Factoid => Block::Factoid(FactoidBlock::unmarshal(data)?),
            BlockKind::EntryBlock => Block::EntryBlock(EntryBlock::unmarshal(data)?),
            BlockKind::Entry => Block::Entry(Entry::unmarshal(data)?),
        })
    }

    /// The hash a peer uses to fetch this item: what its parent records.
    pub fn hash(&self) -> Result<Hash> {
        Ok(match self {
            Block::Directory(b) => b.key_mr()?,
            Block::Admin(b) => b.hash(),
            Block::EntryCredit(b) => b.header_hash(),
            Block::Factoid(b) => b.key_mr(),
            Block::EntryBlock(b) => b.key_mr(),
            Block::Entry(b) => b.hash(),
        })
    }

    /// Key Merkle root where the kind has one, otherwise the lookup hash.
    pub fn key_mr(&self) -> Result<Hash> {
        match self {
            Block::Directory(b) => b.key_mr(),
            Block::Factoid(b) => Ok(b.key_mr()),
            Block::EntryBlock(b) => Ok(b.key_mr()),
            other => other.hash(),
        }
    }

    /// Chain height for kinds that carry one.
    pub fn height(&self) -> Option<u32> {
        match self {
            Block::Directory(b) => Some(b.header.height),
            Block::Admin(b) => Some(b.height),
            Block::EntryCredit(b) => Some(b.height),
            Block::Factoid(b) => Some(b.height),
            Block::EntryBlock(b) => Some(b.height),
            Block::Entry(_) => None,
        }
    }
}
