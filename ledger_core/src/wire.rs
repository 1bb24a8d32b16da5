//! Little-endian primitives shared by the piece and tree node codecs.
//!
//! The reader never indexes past the end of its buffer: every read checks
//! the remaining length first and fails with [`Error::Decode`].

use crate::error::{Error, Result};

/// Size of a `u32` length prefix or element count.
pub const LEN_SIZE: usize = 4;

/// Append-only encoder.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a `u32` element count.
    pub fn put_len(&mut self, len: usize) {
        self.put_u32(len as u32);
    }

    /// Write a `u32` length prefix followed by the bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_len(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked decoder over an untrusted buffer.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::decode(format!(
                "Truncated {}: need {} bytes at offset {}, {} left",
                what,
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self, what: &str) -> Result<u64> {
        let mut array = [0u8; 8];
        array.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_le_bytes(array))
    }

    /// Read a length-prefixed byte string of at most `max_len` bytes.
    pub fn read_bytes(&mut self, max_len: usize, what: &str) -> Result<&'a [u8]> {
        let len = self.read_u32(what)? as usize;
        if len > max_len {
            return Err(Error::decode(format!(
                "{} length {} exceeds maximum {}",
                what, len, max_len
            )));
        }
        self.take(len, what)
    }

    /// Read an element count for a vector whose elements take at least
    /// `min_element_size` bytes each.
    ///
    /// Counts that cannot fit in the remaining buffer are rejected before
    /// anything is allocated for them.
    pub fn read_count(&mut self, min_element_size: usize, what: &str) -> Result<usize> {
        let count = self.read_u32(what)? as usize;
        let needed = count.checked_mul(min_element_size.max(1));
        match needed {
            Some(needed) if needed <= self.remaining() => Ok(count),
            _ => Err(Error::decode(format!(
                "{} count {} does not fit in the {} remaining bytes",
                what,
                count,
                self.remaining()
            ))),
        }
    }

    /// Fail unless the whole buffer has been consumed.
    pub fn finish(self, what: &str) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::decode(format!(
                "{} has {} trailing bytes",
                what,
                self.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_primitives() {
        let mut writer = Writer::default();
        writer.put_u8(7);
        writer.put_u32(0xDEAD_BEEF);
        writer.put_u64(0x0123_4567_89AB_CDEF);
        writer.put_bytes(b"key");
        let buf = writer.into_bytes();

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_u8("a").unwrap(), 7);
        assert_eq!(reader.read_u32("b").unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_u64("c").unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(reader.read_bytes(16, "d").unwrap(), b"key");
        reader.finish("buffer").unwrap();
    }

    #[test]
    fn test_truncated_reads_fail() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert!(reader.read_u32("value").is_err());
        // A failed read consumes nothing
        assert_eq!(reader.remaining(), 3);
        assert!(reader.read_u64("value").is_err());
    }

    #[test]
    fn test_length_prefix_beyond_buffer() {
        let mut writer = Writer::default();
        writer.put_u32(1000);
        writer.put_u8(1);
        let buf = writer.into_bytes();

        let mut reader = Reader::new(&buf);
        assert!(reader.read_bytes(usize::MAX, "bytes").is_err());
    }

    #[test]
    fn test_length_prefix_above_maximum() {
        let mut writer = Writer::default();
        writer.put_bytes(&[0u8; 40]);
        let buf = writer.into_bytes();

        let mut reader = Reader::new(&buf);
        assert!(reader.read_bytes(33, "digest").is_err());
    }

    #[test]
    fn test_huge_count_rejected() {
        let mut writer = Writer::default();
        writer.put_u32(u32::MAX);
        let buf = writer.into_bytes();

        let mut reader = Reader::new(&buf);
        assert!(reader.read_count(8, "children").is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let reader = Reader::new(&[0]);
        assert!(reader.finish("buffer").is_err());
    }
}
