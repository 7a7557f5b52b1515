//! Binary Merkle trees over SHA-256.
//!
//! An odd node at any level is paired with itself.

use crate::hash::Hash;
use crate::{BlockError, Result};

/// Hash of two concatenated child hashes.
pub fn pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    Hash::sha256(&buf)
}

/// Root of the tree whose leaves are `leaves`. A single leaf is its own root.
pub fn root(leaves: &[Hash]) -> Result<Hash> {
    if leaves.is_empty() {
        return Err(BlockError::EmptyBody);
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|c| pair(&c[0], c.get(1).unwrap_or(&c[0])))
            .collect();
    }
    Ok(level[0])
}
