//! Length-delimited JSON codec for peer TCP streams.
//!
//! Wire format: 4-byte big-endian length prefix + serde JSON parcel.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::params::CURRENT_PARAMS;
use crate::parcel::Parcel;
use crate::ProtocolError;

/// Length prefix size in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for framing Parcel values over a byte stream.
pub struct ParcelCodec {
    max_size: usize,
}

impl ParcelCodec {
    pub fn new() -> Self {
        Self::with_max_size(CURRENT_PARAMS.max_message_bytes)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Default for ParcelCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ParcelCodec {
    type Item = Parcel;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let frame = src.split_to(length);

        let parcel: Parcel = serde_json::from_slice(&frame)?;
        Ok(Some(parcel))
    }
}

impl Encoder<Parcel> for ParcelCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Parcel, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;

        if payload.len() > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: self.max_size,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}
