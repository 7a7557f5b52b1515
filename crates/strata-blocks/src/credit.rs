//! Entry-credit blocks.
//!
//! Layout: `height u32 | prev_header_hash 32 | body_hash 32 | count u32 | records`.
//! Identified by the hash of the header (everything before the count).

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::wire::{put_hash, put_records, take_records, Reader};
use crate::{BlockError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCreditBlock {
    pub height: u32,
    pub prev_header_hash: Hash,
    pub records: Vec<Vec<u8>>,
}

impl EntryCreditBlock {
    fn body_hash(&self) -> Hash {
        let mut body = Vec::new();
        put_records(&mut body, &self.records);
        Hash::sha256(&body)
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(68);
        out.put_u32(self.height);
        put_hash(&mut out, &self.prev_header_hash);
        put_hash(&mut out, &self.body_hash());
        out
    }

    pub fn header_hash(&self) -> Hash {
        Hash::sha256(&self.header_bytes())
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        put_records(&mut out, &self.records);
        out
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let height = r.u32()?;
        let prev_header_hash = r.hash()?;
        let body_hash = r.hash()?;
        let records = take_records(&mut r)?;
        r.finish()?;
        let block = Self {
            height,
            prev_header_hash,
            records,
        };
        let computed = block.body_hash();
        if computed != body_hash {
            return Err(BlockError::LinkMismatch {
                field: "body_hash",
                expected: computed,
                got: body_hash,
            });
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EntryCreditBlock {
        EntryCreditBlock {
            height: 3,
            prev_header_hash: Hash::sha256(b"p"),
            records: vec![b"commit-1".to_vec(), b"commit-2".to_vec()],
        }
    }

    #[test]
    fn test_roundtrip() {
        let b = sample();
        let parsed = EntryCreditBlock::unmarshal(&b.marshal()).unwrap();
        assert_eq!(parsed.header_hash(), b.header_hash());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let mut data = sample().marshal();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert!(matches!(
            EntryCreditBlock::unmarshal(&data),
            Err(BlockError::LinkMismatch {
                field: "body_hash",
                ..
            })
        ));
    }
}
