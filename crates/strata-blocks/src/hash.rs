//! 32-byte hashes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::BlockError;

pub const HASH_LEN: usize = 32;

/// A SHA-256 sized identifier. Serialised as lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    pub fn sha256(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest);
        Hash(out)
    }

    /// Hash with only the last byte set. Used for well-known chain ids and
    /// entry block minute markers.
    pub const fn from_low_byte(b: u8) -> Self {
        let mut out = [0u8; HASH_LEN];
        out[HASH_LEN - 1] = b;
        Hash(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, BlockError> {
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
            BlockError::InvalidHex(format!("expected {HASH_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Hash(arr))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl FromStr for Hash {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| BlockError::InvalidHex(e.to_string()))?;
        Hash::from_slice(&bytes)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let h = Hash::sha256(b"strata");
        let parsed: Hash = h.to_hex().parse().unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let h = Hash::from_low_byte(0x0a);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(
            json,
            "\"000000000000000000000000000000000000000000000000000000000000000a\""
        );
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_rejects_short_hex() {
        assert!("abcd".parse::<Hash>().is_err());
        assert!("zz".parse::<Hash>().is_err());
    }

    #[test]
    fn test_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::from_low_byte(1).is_zero());
    }
}
