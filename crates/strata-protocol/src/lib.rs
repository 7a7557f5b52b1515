//! Strata Protocol -- parcels, inventory vectors, message codec.
//!
//! TCP between peers. Every frame is one parcel:
//! 4-byte big-endian length prefix + serde JSON.

pub mod codec;
pub mod inventory;
pub mod messages;
pub mod params;
pub mod parcel;

pub use codec::ParcelCodec;
pub use inventory::{InvType, InvVect};
pub use messages::{Message, PeerAddress, PeerShare};
pub use params::{ProtocolParams, CURRENT_PARAMS, PARAMS_V1};
pub use parcel::{Parcel, ParcelHeader, ParcelType};

/// Network identifier carried in every parcel header.
pub type NetworkId = u32;

pub const MAIN_NET: NetworkId = 0xFA92_E5A2;
pub const TEST_NET: NetworkId = 0xFA92_E5A3;
pub const LOCAL_NET: NetworkId = 0xFA92_E5A4;

/// Resolve a configured network name. Unknown names hash to a private id so
/// separate devnets do not talk to each other.
pub fn network_id(name: &str) -> NetworkId {
    match name.to_ascii_uppercase().as_str() {
        "MAIN" | "MAINNET" => MAIN_NET,
        "TEST" | "TESTNET" => TEST_NET,
        "LOCAL" | "LOCALNET" => LOCAL_NET,
        other => {
            let h = strata_blocks::Hash::sha256(other.as_bytes());
            u32::from_be_bytes([h.0[0], h.0[1], h.0[2], h.0[3]])
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("wrong network: expected {expected:#010x}, got {got:#010x}")]
    WrongNetwork { expected: NetworkId, got: NetworkId },
    #[error("parcel type {0:?} does not carry an application message")]
    NotAMessage(ParcelType),
    #[error("block error: {0}")]
    Block(#[from] strata_blocks::BlockError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
