//! Deterministic chains for devnets and tests.
//!
//! Every height gets an admin, entry-credit and factoid block plus one entry
//! block on a single user chain holding two entries.

use crate::chain::minute_marker;
use crate::{
    AdminBlock, Block, DirectoryBlock, Entry, EntryBlock, EntryCreditBlock, FactoidBlock, Hash,
    Result,
};

/// Timestamp (minutes) of the fixture genesis block.
pub const GENESIS_MINUTES: u32 = 29_000_000;

#[derive(Debug, Clone, Default)]
pub struct ChainFixture {
    pub directory: Vec<DirectoryBlock>,
    pub admin: Vec<AdminBlock>,
    pub entry_credit: Vec<EntryCreditBlock>,
    pub factoid: Vec<FactoidBlock>,
    pub entry_blocks: Vec<EntryBlock>,
    pub entries: Vec<Entry>,
}

impl ChainFixture {
    /// Every block, dependents of a height before its directory block.
    pub fn all_blocks(&self) -> Vec<Block> {
        let mut out = Vec::new();
        for (i, d) in self.directory.iter().enumerate() {
            out.push(Block::Admin(self.admin[i].clone()));
            out.push(Block::EntryCredit(self.entry_credit[i].clone()));
            out.push(Block::Factoid(self.factoid[i].clone()));
            out.push(Block::EntryBlock(self.entry_blocks[i].clone()));
            for e in &self.entries[i * 2..i * 2 + 2] {
                out.push(Block::Entry(e.clone()));
            }
            out.push(Block::Directory(d.clone()));
        }
        out
    }
}

pub fn fixture_chain_id() -> Hash {
    Hash::sha256(b"strata fixture chain")
}

/// Build `count` linked heights starting at genesis.
pub fn build_chain(network_id: u32, count: u32) -> Result<ChainFixture> {
    let mut fx = ChainFixture::default();
    let chain_id = fixture_chain_id();

    for height in 0..count {
        let prev = fx.directory.last();

        let admin = AdminBlock {
            height,
            prev_hash: fx.admin.last().map(|b| b.hash()).unwrap_or(Hash::ZERO),
            records: vec![format!("admin {height}").into_bytes()],
        };
        let credit = EntryCreditBlock {
            height,
            prev_header_hash: fx
                .entry_credit
                .last()
                .map(|b| b.header_hash())
                .unwrap_or(Hash::ZERO),
            records: vec![format!("commit {height}").into_bytes()],
        };
        let factoid = FactoidBlock {
            height,
            prev_key_mr: fx.factoid.last().map(|b| b.key_mr()).unwrap_or(Hash::ZERO),
            exchange_rate: 1_000,
            transactions: vec![format!("coinbase {height}").into_bytes()],
        };
        let entries: Vec<Entry> = (0..2)
            .map(|i| Entry {
                chain_id,
                content: format!("entry {height}.{i}").into_bytes(),
            })
            .collect();
        let entry_block = EntryBlock {
            chain_id,
            height,
            prev_key_mr: fx
                .entry_blocks
                .last()
                .map(|b| b.key_mr())
                .unwrap_or(Hash::ZERO),
            body: vec![
                entries[0].hash(),
                minute_marker(1),
                entries[1].hash(),
                minute_marker(2),
            ],
        };

        let mut dblock = DirectoryBlock::new(prev, network_id)?;
        dblock.header.timestamp = GENESIS_MINUTES + height * 10;
        dblock.set_admin_block_hash(admin.hash());
        dblock.set_entry_credit_block_hash(credit.header_hash());
        dblock.set_factoid_block_hash(factoid.key_mr());
        dblock.add_entry(chain_id, entry_block.key_mr());
        dblock.finalize()?;

        fx.directory.push(dblock);
        fx.admin.push(admin);
        fx.entry_credit.push(credit);
        fx.factoid.push(factoid);
        fx.entry_blocks.push(entry_block);
        fx.entries.extend(entries);
    }
    Ok(fx)
}
