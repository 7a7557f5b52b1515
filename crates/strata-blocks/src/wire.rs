//! Bounds-checked big-endian readers and writers shared by the block codecs.

use bytes::{Buf, BufMut};

use crate::hash::{Hash, HASH_LEN};
use crate::{BlockError, Result};

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(BlockError::Truncated {
                needed: n,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn hash(&mut self) -> Result<Hash> {
        self.need(HASH_LEN)?;
        let mut out = [0u8; HASH_LEN];
        self.buf.copy_to_slice(&mut out);
        Ok(Hash(out))
    }

    /// A u32 length prefix followed by that many bytes.
    pub fn record(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let out = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(out)
    }

    /// Reject a declared item count that cannot fit in what is left.
    pub fn check_count(&self, count: u32, item_len: usize) -> Result<()> {
        let needed = (count as usize).saturating_mul(item_len);
        if needed > self.remaining() {
            return Err(BlockError::EntryCountOverflow {
                count,
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(BlockError::TrailingBytes(n)),
        }
    }
}

pub(crate) fn put_hash(out: &mut Vec<u8>, h: &Hash) {
    out.put_slice(h.as_bytes());
}

pub(crate) fn put_record(out: &mut Vec<u8>, data: &[u8]) {
    out.put_u32(data.len() as u32);
    out.put_slice(data);
}

pub(crate) fn put_records(out: &mut Vec<u8>, records: &[Vec<u8>]) {
    out.put_u32(records.len() as u32);
    for r in records {
        put_record(out, r);
    }
}

/// Reads a u32 count then that many records. Each record costs at least its
/// four byte prefix, which bounds the count.
pub(crate) fn take_records(r: &mut Reader<'_>) -> Result<Vec<Vec<u8>>> {
    let count = r.u32()?;
    r.check_count(count, 4)?;
    (0..count).map(|_| r.record()).collect()
}
