//! Factoid blocks: the value-transfer transactions of one height.
//!
//! Layout: `height u32 | prev_key_mr 32 | exchange_rate u64 | count u32 | txs`.
//! Key root is `merkle(sha256(header), merkle(tx hashes))`; an empty block
//! uses the zero hash as its body root.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::merkle;
use crate::wire::{put_hash, put_records, take_records, Reader};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoidBlock {
    pub height: u32,
    pub prev_key_mr: Hash,
    pub exchange_rate: u64,
    pub transactions: Vec<Vec<u8>>,
}

impl FactoidBlock {
    pub fn body_mr(&self) -> Hash {
        let leaves: Vec<Hash> = self
            .transactions
            .iter()
            .map(|tx| Hash::sha256(tx))
            .collect();
        merkle::root(&leaves).unwrap_or(Hash::ZERO)
    }

    pub fn key_mr(&self) -> Hash {
        let mut header = Vec::with_capacity(76);
        header.put_u32(self.height);
        put_hash(&mut header, &self.prev_key_mr);
        header.put_u64(self.exchange_rate);
        put_hash(&mut header, &self.body_mr());
        merkle::pair(&Hash::sha256(&header), &self.body_mr())
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u32(self.height);
        put_hash(&mut out, &self.prev_key_mr);
        out.put_u64(self.exchange_rate);
        put_records(&mut out, &self.transactions);
        out
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let height = r.u32()?;
        let prev_key_mr = r.hash()?;
        let exchange_rate = r.u64()?;
        let transactions = take_records(&mut r)?;
        r.finish()?;
        Ok(Self {
            height,
            prev_key_mr,
            exchange_rate,
            transactions,
        })
    }
}
