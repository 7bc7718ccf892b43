// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Byte-level primitives of the tile format: big-endian integers and
//! variable-length integers (LEB128, with signed values stored as sign + magnitude).

/// Errors produced when decoding malformed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),

    #[error("variable-length integer too long at offset {0}")]
    VarintTooLong(usize),

    #[error("value out of range at offset {0}")]
    OutOfRange(usize),
}

/// Cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof(self.pos));
        }
        let b = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(b)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut a = [0; N];
        a.copy_from_slice(self.read_bytes(N)?);
        Ok(a)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut value = 0_u64;
        for shift in (0..64).step_by(7) {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarintTooLong(start))
    }

    pub fn read_signed(&mut self) -> Result<i64, DecodeError> {
        let raw = self.read_varint()?;
        let magnitude = (raw >> 1) as i64;
        Ok(if raw & 1 == 1 { -magnitude } else { magnitude })
    }

    /// Reads a signed varint which must fit into an `i32`.
    pub fn read_signed_i32(&mut self) -> Result<i32, DecodeError> {
        let start = self.pos;
        i32::try_from(self.read_signed()?).map_err(|_| DecodeError::OutOfRange(start))
    }

    /// Reads a varint length which must not exceed the remaining data.
    pub fn read_length(&mut self) -> Result<usize, DecodeError> {
        let start = self.pos;
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(DecodeError::OutOfRange(start));
        }
        Ok(len as usize)
    }
}

/// Growable output buffer.
#[derive(Debug, Default, Clone)]
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

    pub fn write_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8 & 0x7F) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    pub fn write_signed(&mut self, v: i64) {
        let magnitude = v.unsigned_abs();
        self.write_varint((magnitude << 1) | (v < 0) as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varints() {
        let mut w = ByteWriter::new();
        w.write_varint(0);
        w.write_varint(127);
        w.write_varint(128);
        w.write_varint(300);
        assert_eq!(w.as_slice(), &[0x00, 0x7F, 0x80, 0x01, 0xAC, 0x02]);

        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_varint(), Ok(0));
        assert_eq!(r.read_varint(), Ok(127));
        assert_eq!(r.read_varint(), Ok(128));
        assert_eq!(r.read_varint(), Ok(300));
        assert!(r.is_empty());
        assert_eq!(r.read_varint(), Err(DecodeError::UnexpectedEof(6)));
    }

    #[test]
    fn signed_varints() {
        let mut w = ByteWriter::new();
        w.write_signed(0);
        w.write_signed(1);
        w.write_signed(-1);
        w.write_signed(-300);
        w.write_signed(i16::MIN as i64);
        assert_eq!(&w.as_slice()[..3], &[0x00, 0x02, 0x03]);

        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_signed(), Ok(0));
        assert_eq!(r.read_signed(), Ok(1));
        assert_eq!(r.read_signed(), Ok(-1));
        assert_eq!(r.read_signed(), Ok(-300));
        assert_eq!(r.read_signed(), Ok(i16::MIN as i64));
    }

    #[test]
    fn malformed_input() {
        let mut r = ByteReader::new(&[0xFF; 11]);
        assert_eq!(r.read_varint(), Err(DecodeError::VarintTooLong(0)));

        let mut r = ByteReader::new(&[0x05, 1, 2]);
        assert_eq!(r.read_length(), Err(DecodeError::OutOfRange(0)));

        let mut r = ByteReader::new(&[0x00, 0x01]);
        assert_eq!(r.read_u32(), Err(DecodeError::UnexpectedEof(0)));
    }

    #[test]
    fn big_endian_integers() {
        let mut w = ByteWriter::new();
        w.write_i16(-2);
        w.write_u32(0x01020304);
        assert_eq!(w.as_slice(), &[0xFF, 0xFE, 1, 2, 3, 4]);

        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_i16(), Ok(-2));
        assert_eq!(r.read_u32(), Ok(0x01020304));
    }
}
