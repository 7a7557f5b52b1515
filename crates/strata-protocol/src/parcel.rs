//! Parcels: the envelope every frame carries.

use serde::{Deserialize, Serialize};

use crate::messages::{base64_bytes, Message, PeerShare};
use crate::{NetworkId, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelType {
    Heartbeat,
    Ping,
    Pong,
    PeerRequest,
    PeerResponse,
    Alert,
    Message,
    MessagePart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelHeader {
    pub network: NetworkId,
    pub parcel_type: ParcelType,
    /// Sender's node id; stamped by the sending peer.
    #[serde(default)]
    pub node_id: u64,
    /// Port the sender listens on; "0" when it cannot be dialled.
    #[serde(default)]
    pub peer_port: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parcel {
    pub header: ParcelHeader,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl Parcel {
    pub fn new(network: NetworkId, parcel_type: ParcelType, payload: Vec<u8>) -> Self {
        Self {
            header: ParcelHeader {
                network,
                parcel_type,
                node_id: 0,
                peer_port: String::new(),
            },
            payload,
        }
    }

    pub fn message(network: NetworkId, msg: &Message) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            network,
            ParcelType::Message,
            serde_json::to_vec(msg)?,
        ))
    }

    pub fn peer_request(network: NetworkId) -> Self {
        Self::new(network, ParcelType::PeerRequest, Vec::new())
    }

    pub fn peer_response(network: NetworkId, share: &PeerShare) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            network,
            ParcelType::PeerResponse,
            serde_json::to_vec(share)?,
        ))
    }

    pub fn decode_message(&self) -> Result<Message, ProtocolError> {
        if self.header.parcel_type != ParcelType::Message {
            return Err(ProtocolError::NotAMessage(self.header.parcel_type));
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn decode_peer_share(&self) -> Result<PeerShare, ProtocolError> {
        if self.header.parcel_type != ParcelType::PeerResponse {
            return Err(ProtocolError::NotAMessage(self.header.parcel_type));
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn check_network(&self, expected: NetworkId) -> Result<(), ProtocolError> {
        if self.header.network != expected {
            return Err(ProtocolError::WrongNetwork {
                expected,
                got: self.header.network,
            });
        }
        Ok(())
    }
}
