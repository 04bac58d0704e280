//! Byte-level plumbing shared by the container codec and the instruction decoder.
//!
//! [`ByteReader`] never reads past the end of its slice: every typed read is
//! bounds-checked and fails with a [`AsbError::Decode`] tagged with the
//! absolute position of the read.

use byteorder::{ByteOrder, LittleEndian};
use bytes::BufMut;

use crate::error::{AsbError, Result};

/// Borrow `len` bytes at `pos` without touching any cursor.
pub fn peek_bytes(buf: &[u8], pos: usize, len: usize) -> Option<&[u8]> {
    buf.get(pos..pos.checked_add(len)?)
}

/// Overwrite four bytes at `offset` with `value` (little-endian).
pub fn patch_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let len = buf.len();
    let slot = offset
        .checked_add(4)
        .and_then(|end| buf.get_mut(offset..end))
        .ok_or_else(|| {
            AsbError::encode(format!(
                "patch at 0x{:X} is outside of a {} byte buffer",
                offset, len
            ))
        })?;
    LittleEndian::write_u32(slot, value);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Added to every reported position.
    base: usize,
    saved: Vec<usize>,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_base(buf, 0)
    }

    /// A reader over a sub-slice whose first byte sits at `base` in some
    /// larger address space (e.g. a function inside the code section).
    pub fn with_base(buf: &'a [u8], base: usize) -> Self {
        Self {
            buf,
            pos: 0,
            base,
            saved: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn absolute_position(&self) -> usize {
        self.base + self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(AsbError::decode(
                self.base + pos,
                format!("seek past the end of a {} byte buffer", self.buf.len()),
            ));
        }
        self.pos = pos;
        Ok(())
    }

    /// Remember the cursor; pair with [`ByteReader::restore`].
    pub fn save(&mut self) {
        self.saved.push(self.pos);
    }

    pub fn restore(&mut self) {
        if let Some(pos) = self.saved.pop() {
            self.pos = pos;
        }
    }

    pub fn peek_bytes(&self, len: usize) -> Option<&'a [u8]> {
        peek_bytes(self.buf, self.pos, len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = peek_bytes(self.buf, self.pos, len).ok_or_else(|| {
            AsbError::decode(
                self.absolute_position(),
                format!(
                    "unexpected end of data: need {} byte(s), {} left",
                    len,
                    self.remaining()
                ),
            )
        })?;
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_block(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Read up to the next NUL; the terminator is consumed but not returned.
    pub fn read_cstr(&mut self) -> Result<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let len = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            AsbError::decode(self.absolute_position(), "unterminated string")
        })?;
        let s = self.take(len)?;
        self.pos += 1;
        Ok(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn put_block(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn put_cstr(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
        self.buf.put_u8(0);
    }

    /// Write `data` into a field of exactly `width` bytes, NUL padded.
    pub fn put_fixed(&mut self, data: &[u8], width: usize) {
        let n = data.len().min(width);
        self.buf.put_slice(&data[..n]);
        self.buf.put_bytes(0, width - n);
    }

    /// Zero-pad up to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let rem = self.buf.len() % alignment;
        if rem != 0 {
            self.buf.put_bytes(0, alignment - rem);
        }
    }

    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        patch_u32(&mut self.buf, offset, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_reads_are_little_endian() {
        let data = hex::decode("0102030405060708").unwrap();
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        assert_eq!(r.read_u32().unwrap(), 0x0605_0403);
        assert_eq!(r.remaining(), 2);
    }

    #[test]
    fn wide_values_round_trip() {
        let mut w = ByteWriter::new();
        w.put_u16(0xBEEF);
        w.put_u64(0x0102_0304_0506_0708);
        assert_eq!(hex::encode(w.as_slice()), "efbe0807060504030201");
        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_u16().unwrap(), 0xBEEF);
        assert_eq!(r.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert!(r.at_end());
    }

    #[test]
    fn short_read_reports_absolute_position() {
        let data = [0u8; 6];
        let mut r = ByteReader::with_base(&data, 0x100);
        r.read_u32().unwrap();
        let err = r.read_u32().unwrap_err();
        assert_eq!(err.position(), Some(0x104));
        // A failed read leaves the cursor alone.
        assert_eq!(r.position(), 4);
    }

    #[test]
    fn save_and_restore() {
        let data = [1u8, 2, 3, 4];
        let mut r = ByteReader::new(&data);
        r.read_u8().unwrap();
        r.save();
        r.read_u16().unwrap();
        r.restore();
        assert_eq!(r.read_u8().unwrap(), 2);
    }

    #[test]
    fn cstr() {
        let data = b"ab\0c\0";
        let mut r = ByteReader::new(data);
        assert_eq!(r.read_cstr().unwrap(), b"ab");
        assert_eq!(r.read_cstr().unwrap(), b"c");
        assert!(r.at_end());
        let mut r = ByteReader::new(b"abc");
        assert!(r.read_cstr().is_err());
    }

    #[test]
    fn peek_is_pure() {
        let data = [9u8, 8, 7];
        assert_eq!(peek_bytes(&data, 1, 2), Some(&data[1..3]));
        assert_eq!(peek_bytes(&data, 2, 2), None);
        assert_eq!(peek_bytes(&data, usize::MAX, 2), None);
    }

    #[test]
    fn writer_pads_and_patches() {
        let mut w = ByteWriter::new();
        w.put_u8(0xAA);
        w.align(4);
        w.put_u32(0xDEAD_C0DE);
        w.put_fixed(b"xy", 4);
        w.patch_u32(4, 7).unwrap();
        assert_eq!(hex::encode(w.as_slice()), "aa0000000700000078790000");
        assert!(w.patch_u32(10, 0).is_err());
    }
}
