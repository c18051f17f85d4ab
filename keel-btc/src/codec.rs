//! Tag-prefixed, length-delimited record codec.
//!
//! Every value persisted by the wallet store is framed as
//! `var_int(len) || payload`; the var-int is Bitcoin's compact-size
//! encoding and all multi-byte integers are little-endian.

use crate::{Error, Result};

/// Append-only writer for store records.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a little-endian u16.
    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u32.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u64.
    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian i32.
    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a Bitcoin compact-size var-int (1/3/5/9 bytes).
    pub fn put_var_int(&mut self, value: u64) {
        match value {
            0..=0xfc => self.put_u8(value as u8),
            0xfd..=0xffff => {
                self.put_u8(0xfd);
                self.put_u16(value as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.put_u8(0xfe);
                self.put_u32(value as u32);
            }
            _ => {
                self.put_u8(0xff);
                self.put_u64(value);
            }
        }
    }

    /// Append raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the writer, returning the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// View the bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Cursor-based reader over a store record.
#[derive(Debug)]
pub struct BinaryReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    /// Wrap a byte slice.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the cursor has reached the end.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Read a single byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        let bytes = self.get_bytes(1)?;
        Ok(bytes[0])
    }

    /// Read a little-endian u16.
    pub fn get_u16(&mut self) -> Result<u16> {
        let bytes = self.get_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian u32.
    pub fn get_u32(&mut self) -> Result<u32> {
        let bytes = self.get_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian u64.
    pub fn get_u64(&mut self) -> Result<u64> {
        let bytes = self.get_bytes(8)?;
        let raw: [u8; 8] = bytes.try_into().expect("length checked");
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a little-endian i32.
    pub fn get_i32(&mut self) -> Result<i32> {
        let bytes = self.get_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a Bitcoin compact-size var-int.
    pub fn get_var_int(&mut self) -> Result<u64> {
        let first = self.get_u8()?;
        match first {
            0xfd => Ok(u64::from(self.get_u16()?)),
            0xfe => Ok(u64::from(self.get_u32()?)),
            0xff => self.get_u64(),
            _ => Ok(u64::from(first)),
        }
    }

    /// Read `count` raw bytes.
    pub fn get_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(Error::Corrupt("record truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Read all remaining bytes.
    pub fn get_remaining(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

/// Wrap a payload in the standard `var_int(len) || payload` envelope.
#[must_use]
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.put_var_int(payload.len() as u64);
    writer.put_bytes(payload);
    writer.into_bytes()
}

/// Strip the standard length envelope, validating that the declared
/// length matches the remaining buffer exactly.
pub fn unframe(value: &[u8]) -> Result<&[u8]> {
    let mut reader = BinaryReader::new(value);
    let declared = reader.get_var_int()?;
    if declared != reader.remaining() as u64 {
        return Err(Error::Corrupt("on disk data length mismatch"));
    }
    Ok(reader.get_remaining())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_int_widths() {
        let cases: &[(u64, usize)] = &[
            (0, 1),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
        ];
        for &(value, width) in cases {
            let mut writer = BinaryWriter::new();
            writer.put_var_int(value);
            assert_eq!(writer.len(), width, "width for {value:#x}");

            let bytes = writer.into_bytes();
            let mut reader = BinaryReader::new(&bytes);
            assert_eq!(reader.get_var_int().unwrap(), value);
            assert!(reader.is_exhausted());
        }
    }

    #[test]
    fn test_integers_little_endian() {
        let mut writer = BinaryWriter::new();
        writer.put_u32(0x0102_0304);
        writer.put_i32(-2);
        assert_eq!(
            writer.as_bytes(),
            &[0x04, 0x03, 0x02, 0x01, 0xfe, 0xff, 0xff, 0xff]
        );

        let bytes = writer.into_bytes();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.get_u32().unwrap(), 0x0102_0304);
        assert_eq!(reader.get_i32().unwrap(), -2);
    }

    #[test]
    fn test_reader_truncation() {
        let mut reader = BinaryReader::new(&[0x01, 0x02]);
        assert!(reader.get_u32().is_err());
    }

    #[test]
    fn test_frame_roundtrip() {
        let framed = frame(b"hello");
        assert_eq!(framed[0], 5);
        assert_eq!(unframe(&framed).unwrap(), b"hello");
    }

    #[test]
    fn test_unframe_length_mismatch() {
        // declared length 5, only 4 bytes follow
        let bad = [5u8, b'a', b'b', b'c', b'd'];
        assert!(matches!(unframe(&bad), Err(Error::Corrupt(_))));

        // declared length 3, 4 bytes follow
        let bad = [3u8, b'a', b'b', b'c', b'd'];
        assert!(unframe(&bad).is_err());
    }
}
