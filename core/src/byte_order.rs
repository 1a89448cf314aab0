// core/src/byte_order.rs

//! Bounds-checked big-endian cursors.
//!
//! Every multi-byte field on the wire (AppleMIDI, RTP, journal) goes through
//! these two types. A read past the end of the buffer is an error, never a
//! panic, and leaves the cursor where it was.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{ProtocolError, Result};

/// Read cursor over a borrowed datagram.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Everything not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::TruncatedPayload {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf[0])
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.get_bytes(len).map(|_| ())
    }
}

/// Growable write cursor. `len()` is the running output length.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_and_tracks_remaining() {
        let data = [0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0, 0, 0, 0, 1];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.get_u16().unwrap(), 0x1234);
        assert_eq!(reader.remaining(), 12);
        assert_eq!(reader.get_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.get_u64().unwrap(), 1);
        assert!(reader.is_empty());
    }

    #[test]
    fn short_read_fails_without_advancing() {
        let data = [0x01, 0x02, 0x03];
        let mut reader = ByteReader::new(&data);
        match reader.get_u32() {
            Err(ProtocolError::TruncatedPayload { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 3);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
        assert_eq!(reader.remaining(), 3);
        assert_eq!(reader.get_u16().unwrap(), 0x0102);
        assert!(reader.get_bytes(2).is_err());
        assert_eq!(reader.get_bytes(1).unwrap(), &[0x03]);
    }

    #[test]
    fn writer_counts_output_length() {
        let mut writer = ByteWriter::new();
        writer.put_u16(0xFFFF);
        writer.put_u32(7);
        writer.put_u64(9);
        assert_eq!(writer.len(), 14);
        let bytes = writer.freeze();
        assert_eq!(&bytes[..2], &[0xFF, 0xFF]);
        assert_eq!(&bytes[2..6], &[0, 0, 0, 7]);
    }
}
