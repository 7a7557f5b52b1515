//! Entry blocks and entries.
//!
//! An entry block lists the entry hashes one chain accepted at a height,
//! with a minute marker after each closed minute:
//!
//! ```text
//! chain_id 32 | height u32 | prev_key_mr 32 | count u32 | count * 32
//! ```
//!
//! An entry is `chain_id 32 | len u32 | content`.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::chain::is_minute_marker;
use crate::hash::{Hash, HASH_LEN};
use crate::merkle;
use crate::wire::{put_hash, put_record, Reader};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBlock {
    pub chain_id: Hash,
    pub height: u32,
    pub prev_key_mr: Hash,
    /// Entry hashes interleaved with minute markers.
    pub body: Vec<Hash>,
}

impl EntryBlock {
    fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(72);
        put_hash(&mut out, &self.chain_id);
        out.put_u32(self.height);
        put_hash(&mut out, &self.prev_key_mr);
        out
    }

    pub fn key_mr(&self) -> Hash {
        let body_mr = merkle::root(&self.body).unwrap_or(Hash::ZERO);
        merkle::pair(&Hash::sha256(&self.header_bytes()), &body_mr)
    }

    /// Entry hashes without the minute markers.
    pub fn entry_hashes(&self) -> impl Iterator<Item = &Hash> {
        self.body.iter().filter(|h| !is_minute_marker(h))
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        out.put_u32(self.body.len() as u32);
        for h in &self.body {
            put_hash(&mut out, h);
        }
        out
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let chain_id = r.hash()?;
        let height = r.u32()?;
        let prev_key_mr = r.hash()?;
        let count = r.u32()?;
        r.check_count(count, HASH_LEN)?;
        let body = (0..count).map(|_| r.hash()).collect::<Result<Vec<_>>>()?;
        r.finish()?;
        Ok(Self {
            chain_id,
            height,
            prev_key_mr,
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub chain_id: Hash,
    pub content: Vec<u8>,
}

impl Entry {
    pub fn hash(&self) -> Hash {
        Hash::sha256(&self.marshal())
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HASH_LEN + 4 + self.content.len());
        put_hash(&mut out, &self.chain_id);
        put_record(&mut out, &self.content);
        out
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let chain_id = r.hash()?;
        let content = r.record()?;
        r.finish()?;
        Ok(Self { chain_id, content })
    }
}
