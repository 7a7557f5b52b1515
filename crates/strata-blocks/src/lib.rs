//! Strata Blocks -- directory blocks and the blocks they link to.
//!
//! Every height of the chain is anchored by one directory block. Its first
//! three entries point at the admin, entry-credit and factoid blocks for that
//! height; the rest point at entry blocks of user chains.
//!
//! Binary layouts are big-endian and fixed-width except for length-prefixed
//! opaque records.

pub mod admin;
pub mod block;
pub mod chain;
pub mod credit;
pub mod directory;
pub mod entry;
pub mod factoid;
pub mod fixtures;
pub mod hash;
pub mod merkle;

mod wire;

pub use admin::AdminBlock;
pub use block::{Block, BlockKind};
pub use credit::EntryCreditBlock;
pub use directory::{check_block_pair_integrity, DBEntry, DBlockHeader, DirectoryBlock};
pub use entry::{Entry, EntryBlock};
pub use factoid::FactoidBlock;
pub use hash::Hash;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("truncated block: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("entry count {count} needs {needed} bytes, only {available} remain")]
    EntryCountOverflow {
        count: u32,
        needed: usize,
        available: usize,
    },
    #[error("{0} trailing bytes after block")]
    TrailingBytes(usize),
    #[error("directory block has {0} entries, at least 3 required")]
    TooFewEntries(usize),
    #[error("entry {index} has chain id {found}, expected {expected}")]
    WrongFixedChain {
        index: usize,
        expected: Hash,
        found: Hash,
    },
    #[error("cannot build merkle root of an empty body")]
    EmptyBody,
    #[error("genesis block must be height 0, got {0}")]
    GenesisHeight(u32),
    #[error("genesis block links to previous {field} {hash}")]
    GenesisLink { field: &'static str, hash: Hash },
    #[error("height {height} does not follow previous height {prev}")]
    HeightGap { height: u32, prev: u32 },
    #[error("previous {field} mismatch: block has {got}, predecessor is {expected}")]
    LinkMismatch {
        field: &'static str,
        expected: Hash,
        got: Hash,
    },
    #[error("invalid hex hash: {0}")]
    InvalidHex(String),
}

pub type Result<T> = std::result::Result<T, BlockError>;
