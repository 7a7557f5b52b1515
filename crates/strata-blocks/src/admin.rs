//! Admin blocks: per-height administrative records (opaque to this crate).
//!
//! Layout: `height u32 | prev_hash 32 | count u32 | records`.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::wire::{put_hash, put_records, take_records, Reader};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminBlock {
    pub height: u32,
    pub prev_hash: Hash,
    pub records: Vec<Vec<u8>>,
}

impl AdminBlock {
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u32(self.height);
        put_hash(&mut out, &self.prev_hash);
        put_records(&mut out, &self.records);
        out
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let height = r.u32()?;
        let prev_hash = r.hash()?;
        let records = take_records(&mut r)?;
        r.finish()?;
        Ok(Self {
            height,
            prev_hash,
            records,
        })
    }

    /// Lookup hash; this is what the directory block records.
    pub fn hash(&self) -> Hash {
        Hash::sha256(&self.marshal())
    }
}
