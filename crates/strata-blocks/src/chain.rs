//! Well-known chain identifiers.

use crate::hash::Hash;

pub const ADMIN_CHAIN_ID: Hash = Hash::from_low_byte(0x0a);
pub const ENTRY_CREDIT_CHAIN_ID: Hash = Hash::from_low_byte(0x0c);
pub const DIRECTORY_CHAIN_ID: Hash = Hash::from_low_byte(0x0d);
pub const FACTOID_CHAIN_ID: Hash = Hash::from_low_byte(0x0f);

/// Chain ids required at directory block entry positions 0, 1 and 2.
pub const FIXED_CHAINS: [Hash; 3] = [ADMIN_CHAIN_ID, ENTRY_CREDIT_CHAIN_ID, FACTOID_CHAIN_ID];

/// Minutes per block; entry blocks carry one marker per closed minute.
pub const MINUTES_PER_BLOCK: u8 = 10;

pub fn is_fixed_chain(chain_id: &Hash) -> bool {
    FIXED_CHAINS.contains(chain_id)
}

/// Marker placed in an entry block after the entries of minute `n` (1..=10).
pub fn minute_marker(n: u8) -> Hash {
    Hash::from_low_byte(n)
}

pub fn is_minute_marker(h: &Hash) -> bool {
    h.0[..31].iter().all(|b| *b == 0) && (1..=MINUTES_PER_BLOCK).contains(&h.0[31])
}
