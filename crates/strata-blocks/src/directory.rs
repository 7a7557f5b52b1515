//! Directory blocks.
//!
//! Header layout (113 bytes):
//!
//! ```text
//! version u8 | network_id u32 | body_mr 32 | prev_key_mr 32 | prev_full_hash 32
//!           | timestamp u32 (minutes) | height u32 | block_count u32
//! ```
//!
//! followed by `block_count` entries of `chain_id 32 | key_mr 32`.
//!
//! The key Merkle root is `merkle(header_hash, body_mr)`, the full hash is
//! SHA-256 over the whole serialised block. Both are computed on the sealed
//! form: entries from index 3 sorted by chain id and the body root and count
//! written into the header.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::chain::{self, FIXED_CHAINS};
use crate::hash::{Hash, HASH_LEN};
use crate::merkle;
use crate::wire::{put_hash, Reader};
use crate::{BlockError, Result};

pub const HEADER_LEN: usize = 1 + 4 + 3 * HASH_LEN + 4 + 4 + 4;
pub const ENTRY_LEN: usize = 2 * HASH_LEN;
pub const VERSION: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DBlockHeader {
    pub version: u8,
    pub network_id: u32,
    pub body_mr: Hash,
    pub prev_key_mr: Hash,
    pub prev_full_hash: Hash,
    /// Minutes since the unix epoch.
    pub timestamp: u32,
    pub height: u32,
    pub block_count: u32,
}

impl DBlockHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u8(self.version);
        out.put_u32(self.network_id);
        put_hash(out, &self.body_mr);
        put_hash(out, &self.prev_key_mr);
        put_hash(out, &self.prev_full_hash);
        out.put_u32(self.timestamp);
        out.put_u32(self.height);
        out.put_u32(self.block_count);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            version: r.u8()?,
            network_id: r.u32()?,
            body_mr: r.hash()?,
            prev_key_mr: r.hash()?,
            prev_full_hash: r.hash()?,
            timestamp: r.u32()?,
            height: r.u32()?,
            block_count: r.u32()?,
        })
    }

    pub fn hash(&self) -> Hash {
        let mut out = Vec::with_capacity(HEADER_LEN);
        self.encode(&mut out);
        Hash::sha256(&out)
    }
}

/// Links a child chain to its latest block at this height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DBEntry {
    pub chain_id: Hash,
    pub key_mr: Hash,
}

impl DBEntry {
    fn encode(&self, out: &mut Vec<u8>) {
        put_hash(out, &self.chain_id);
        put_hash(out, &self.key_mr);
    }

    fn hash(&self) -> Hash {
        let mut out = Vec::with_capacity(ENTRY_LEN);
        self.encode(&mut out);
        Hash::sha256(&out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryBlock {
    pub header: DBlockHeader,
    pub entries: Vec<DBEntry>,
}

impl DirectoryBlock {
    /// Build the block that follows `prev`, or the genesis block when `prev`
    /// is `None`. The three fixed entries start with zero key roots.
    pub fn new(prev: Option<&DirectoryBlock>, network_id: u32) -> Result<Self> {
        let (height, prev_key_mr, prev_full_hash) = match prev {
            Some(p) => (p.header.height + 1, p.key_mr()?, p.full_hash()?),
            None => (0, Hash::ZERO, Hash::ZERO),
        };
        let entries = FIXED_CHAINS
            .iter()
            .map(|c| DBEntry {
                chain_id: *c,
                key_mr: Hash::ZERO,
            })
            .collect();
        Ok(Self {
            header: DBlockHeader {
                version: VERSION,
                network_id,
                body_mr: Hash::ZERO,
                prev_key_mr,
                prev_full_hash,
                timestamp: now_minutes(),
                height,
                block_count: 0,
            },
            entries,
        })
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn set_admin_block_hash(&mut self, hash: Hash) {
        self.set_fixed(0, hash);
    }

    pub fn set_entry_credit_block_hash(&mut self, hash: Hash) {
        self.set_fixed(1, hash);
    }

    pub fn set_factoid_block_hash(&mut self, hash: Hash) {
        self.set_fixed(2, hash);
    }

    fn set_fixed(&mut self, index: usize, hash: Hash) {
        while self.entries.len() <= index {
            let chain_id = FIXED_CHAINS[self.entries.len()];
            self.entries.push(DBEntry {
                chain_id,
                key_mr: Hash::ZERO,
            });
        }
        self.entries[index] = DBEntry {
            chain_id: FIXED_CHAINS[index],
            key_mr: hash,
        };
    }

    /// Record the latest block of a chain. Fixed chains go to their slot,
    /// a chain already present has its key root replaced.
    pub fn add_entry(&mut self, chain_id: Hash, key_mr: Hash) {
        if let Some(i) = FIXED_CHAINS.iter().position(|c| *c == chain_id) {
            self.set_fixed(i, key_mr);
            return;
        }
        match self.entries.iter_mut().skip(3).find(|e| e.chain_id == chain_id) {
            Some(e) => e.key_mr = key_mr,
            None => self.entries.push(DBEntry { chain_id, key_mr }),
        }
    }

    /// Entries that point at user chain entry blocks.
    pub fn entry_block_entries(&self) -> Vec<DBEntry> {
        self.entries
            .iter()
            .filter(|e| !chain::is_fixed_chain(&e.chain_id))
            .copied()
            .collect()
    }

    /// Stable sort by chain id. Positions 0..3 keep their fixed chains.
    pub fn sort_entries(&mut self) {
        if self.entries.len() > 3 {
            self.entries[3..].sort_by(|a, b| a.chain_id.cmp(&b.chain_id));
        }
    }

    /// Sort, then write the body root and entry count into the header.
    pub fn build_body_mr(&mut self) -> Result<Hash> {
        self.sort_entries();
        let leaves: Vec<Hash> = self.entries.iter().map(DBEntry::hash).collect();
        let body_mr = merkle::root(&leaves)?;
        self.header.body_mr = body_mr;
        self.header.block_count = self.entries.len() as u32;
        Ok(body_mr)
    }

    pub fn finalize(&mut self) -> Result<()> {
        self.build_body_mr().map(|_| ())
    }

    fn sealed(&self) -> Result<DirectoryBlock> {
        let mut b = self.clone();
        b.build_body_mr()?;
        Ok(b)
    }

    pub fn header_hash(&self) -> Result<Hash> {
        Ok(self.sealed()?.header.hash())
    }

    pub fn key_mr(&self) -> Result<Hash> {
        let sealed = self.sealed()?;
        Ok(merkle::pair(&sealed.header.hash(), &sealed.header.body_mr))
    }

    pub fn full_hash(&self) -> Result<Hash> {
        Ok(Hash::sha256(&self.marshal()?))
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        let sealed = self.sealed()?;
        let mut out = Vec::with_capacity(HEADER_LEN + sealed.entries.len() * ENTRY_LEN);
        sealed.header.encode(&mut out);
        for e in &sealed.entries {
            e.encode(&mut out);
        }
        Ok(out)
    }

    /// Parse and structurally check a serialised block.
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let header = DBlockHeader::decode(&mut r)?;
        r.check_count(header.block_count, ENTRY_LEN)?;
        let mut entries = Vec::with_capacity(header.block_count as usize);
        for _ in 0..header.block_count {
            entries.push(DBEntry {
                chain_id: r.hash()?,
                key_mr: r.hash()?,
            });
        }
        r.finish()?;
        let block = Self { header, entries };
        block.check_entries()?;
        Ok(block)
    }

    /// The first three entries must be the admin, entry-credit and factoid
    /// chains, in that order.
    pub fn check_entries(&self) -> Result<()> {
        if self.entries.len() < 3 {
            return Err(BlockError::TooFewEntries(self.entries.len()));
        }
        for (index, expected) in FIXED_CHAINS.iter().enumerate() {
            let found = self.entries[index].chain_id;
            if found != *expected {
                return Err(BlockError::WrongFixedChain {
                    index,
                    expected: *expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

/// Check that `block` links to `prev`. With no predecessor, `block` must be
/// a genesis block with zeroed links.
pub fn check_block_pair_integrity(
    block: &DirectoryBlock,
    prev: Option<&DirectoryBlock>,
) -> Result<()> {
    let h = &block.header;
    let Some(prev) = prev else {
        if h.height != 0 {
            return Err(BlockError::GenesisHeight(h.height));
        }
        if !h.prev_key_mr.is_zero() {
            return Err(BlockError::GenesisLink {
                field: "key_mr",
                hash: h.prev_key_mr,
            });
        }
        if !h.prev_full_hash.is_zero() {
            return Err(BlockError::GenesisLink {
                field: "full_hash",
                hash: h.prev_full_hash,
            });
        }
        return Ok(());
    };

    if prev.header.height.checked_add(1) != Some(h.height) {
        return Err(BlockError::HeightGap {
            height: h.height,
            prev: prev.header.height,
        });
    }
    let prev_key_mr = prev.key_mr()?;
    if h.prev_key_mr != prev_key_mr {
        return Err(BlockError::LinkMismatch {
            field: "key_mr",
            expected: prev_key_mr,
            got: h.prev_key_mr,
        });
    }
    let prev_full_hash = prev.full_hash()?;
    if h.prev_full_hash != prev_full_hash {
        return Err(BlockError::LinkMismatch {
            field: "full_hash",
            expected: prev_full_hash,
            got: h.prev_full_hash,
        });
    }
    Ok(())
}

fn now_minutes() -> u32 {
    (chrono::Utc::now().timestamp() / 60).clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ADMIN_CHAIN_ID, ENTRY_CREDIT_CHAIN_ID, FACTOID_CHAIN_ID};
    use proptest::prelude::*;

    const NET: u32 = 0xFA92_E5A4;

    fn chain(n: u8) -> Hash {
        Hash::sha256(&[b'c', n])
    }

    fn sample(prev: Option<&DirectoryBlock>) -> DirectoryBlock {
        let mut b = DirectoryBlock::new(prev, NET).unwrap();
        b.header.timestamp = 29_000_000;
        b.set_admin_block_hash(Hash::sha256(b"admin"));
        b.set_entry_credit_block_hash(Hash::sha256(b"ec"));
        b.set_factoid_block_hash(Hash::sha256(b"fct"));
        b.add_entry(chain(9), Hash::sha256(b"e9"));
        b.add_entry(chain(2), Hash::sha256(b"e2"));
        b
    }

    #[test]
    fn test_genesis_layout() {
        let b = DirectoryBlock::new(None, NET).unwrap();
        assert_eq!(b.height(), 0);
        assert!(b.header.prev_key_mr.is_zero());
        assert!(b.header.prev_full_hash.is_zero());
        assert_eq!(b.entries.len(), 3);
        b.check_entries().unwrap();
    }

    #[test]
    fn test_child_links_to_parent() {
        let g = sample(None);
        let c = DirectoryBlock::new(Some(&g), NET).unwrap();
        assert_eq!(c.height(), 1);
        assert_eq!(c.header.prev_key_mr, g.key_mr().unwrap());
        assert_eq!(c.header.prev_full_hash, g.full_hash().unwrap());
    }

    #[test]
    fn test_sort_keeps_fixed_entries_in_place() {
        let mut b = sample(None);
        b.finalize().unwrap();
        assert_eq!(b.entries[0].chain_id, ADMIN_CHAIN_ID);
        assert_eq!(b.entries[1].chain_id, ENTRY_CREDIT_CHAIN_ID);
        assert_eq!(b.entries[2].chain_id, FACTOID_CHAIN_ID);
        let rest: Vec<Hash> = b.entries[3..].iter().map(|e| e.chain_id).collect();
        let mut sorted = rest.clone();
        sorted.sort();
        assert_eq!(rest, sorted);
        assert_eq!(b.header.block_count, 5);
    }

    #[test]
    fn test_add_entry_replaces_existing_chain() {
        let mut b = sample(None);
        b.add_entry(chain(9), Hash::sha256(b"newer"));
        assert_eq!(b.entries.len(), 5);
        assert!(b
            .entry_block_entries()
            .iter()
            .any(|e| e.key_mr == Hash::sha256(b"newer")));
    }

    #[test]
    fn test_add_entry_routes_fixed_chain() {
        let mut b = DirectoryBlock::new(None, NET).unwrap();
        b.add_entry(FACTOID_CHAIN_ID, Hash::sha256(b"f"));
        assert_eq!(b.entries.len(), 3);
        assert_eq!(b.entries[2].key_mr, Hash::sha256(b"f"));
    }

    #[test]
    fn test_marshal_length() {
        let b = sample(None);
        assert_eq!(b.marshal().unwrap().len(), HEADER_LEN + 5 * ENTRY_LEN);
        assert_eq!(HEADER_LEN, 113);
    }

    #[test]
    fn test_roundtrip_preserves_identity() {
        let b = sample(None);
        let parsed = DirectoryBlock::unmarshal(&b.marshal().unwrap()).unwrap();
        assert_eq!(parsed.key_mr().unwrap(), b.key_mr().unwrap());
        assert_eq!(parsed.full_hash().unwrap(), b.full_hash().unwrap());
    }

    #[test]
    fn test_key_mr_is_merkle_of_header_and_body() {
        let mut b = sample(None);
        b.finalize().unwrap();
        let expected = merkle::pair(&b.header.hash(), &b.header.body_mr);
        assert_eq!(b.key_mr().unwrap(), expected);
    }

    #[test]
    fn test_empty_body_is_error() {
        let mut b = sample(None);
        b.entries.clear();
        assert_eq!(b.key_mr(), Err(BlockError::EmptyBody));
    }

    #[test]
    fn test_unmarshal_rejects_overlong_count() {
        let b = sample(None);
        let mut data = b.marshal().unwrap();
        // block_count is the last header field
        data[HEADER_LEN - 4..HEADER_LEN].copy_from_slice(&6u32.to_be_bytes());
        assert!(matches!(
            DirectoryBlock::unmarshal(&data),
            Err(BlockError::EntryCountOverflow { count: 6, .. })
        ));
    }

    #[test]
    fn test_unmarshal_rejects_truncated_header() {
        let b = sample(None);
        let data = b.marshal().unwrap();
        assert!(matches!(
            DirectoryBlock::unmarshal(&data[..50]),
            Err(BlockError::Truncated { .. })
        ));
    }

    #[test]
    fn test_check_entries_rejects_swapped_fixed_chains() {
        let mut b = sample(None);
        b.entries.swap(0, 1);
        assert!(matches!(
            b.check_entries(),
            Err(BlockError::WrongFixedChain { index: 0, .. })
        ));
    }

    #[test]
    fn test_check_entries_rejects_short_block() {
        let mut b = sample(None);
        b.entries.truncate(2);
        assert_eq!(b.check_entries(), Err(BlockError::TooFewEntries(2)));
    }

    #[test]
    fn test_unmarshal_rejects_bad_fixed_chain() {
        let mut b = sample(None);
        b.entries[2].chain_id = chain(1);
        let data = b.marshal().unwrap();
        assert!(matches!(
            DirectoryBlock::unmarshal(&data),
            Err(BlockError::WrongFixedChain { index: 2, .. })
        ));
    }

    #[test]
    fn test_pair_integrity_genesis() {
        let g = sample(None);
        check_block_pair_integrity(&g, None).unwrap();

        let c = sample(Some(&g));
        assert_eq!(
            check_block_pair_integrity(&c, None),
            Err(BlockError::GenesisHeight(1))
        );

        let mut bad = sample(None);
        bad.header.prev_full_hash = Hash::sha256(b"x");
        assert!(matches!(
            check_block_pair_integrity(&bad, None),
            Err(BlockError::GenesisLink {
                field: "full_hash",
                ..
            })
        ));
    }

    #[test]
    fn test_pair_integrity_child() {
        let g = sample(None);
        let c = sample(Some(&g));
        check_block_pair_integrity(&c, Some(&g)).unwrap();

        let mut gap = c.clone();
        gap.header.height = 2;
        assert!(matches!(
            check_block_pair_integrity(&gap, Some(&g)),
            Err(BlockError::HeightGap { height: 2, prev: 0 })
        ));

        let mut wrong_kmr = c.clone();
        wrong_kmr.header.prev_key_mr = Hash::sha256(b"other");
        assert!(matches!(
            check_block_pair_integrity(&wrong_kmr, Some(&g)),
            Err(BlockError::LinkMismatch { field: "key_mr", .. })
        ));

        let mut wrong_full = c;
        wrong_full.header.prev_full_hash = Hash::sha256(b"other");
        assert!(matches!(
            check_block_pair_integrity(&wrong_full, Some(&g)),
            Err(BlockError::LinkMismatch {
                field: "full_hash",
                ..
            })
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_identity(
            chains in proptest::collection::vec(any::<[u8; 32]>(), 0..20),
            height in 0u32..1_000_000,
            ts in any::<u32>(),
        ) {
            let mut b = DirectoryBlock::new(None, NET).unwrap();
            b.header.height = height;
            b.header.timestamp = ts;
            for c in &chains {
                b.add_entry(Hash(*c), Hash::sha256(c));
            }
            let parsed = DirectoryBlock::unmarshal(&b.marshal().unwrap()).unwrap();
            prop_assert_eq!(parsed.key_mr().unwrap(), b.key_mr().unwrap());
            prop_assert_eq!(parsed.full_hash().unwrap(), b.full_hash().unwrap());
            prop_assert_eq!(parsed.marshal().unwrap(), b.marshal().unwrap());
        }
    }
}
