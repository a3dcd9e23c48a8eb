//! Canonical wire codec.
//!
//! All consensus-visible structures are encoded with length-prefixed fields:
//! fixed-width integers are little-endian, variable lengths use a compact
//! var-uint (1 byte below 0xFD, otherwise a tag byte 0xFD/0xFE/0xFF followed
//! by a u16/u32/u64). Decoding enforces canonical form: a length encoded in
//! a wider form than necessary is rejected as `IrregularData`, truncation as
//! `UnexpectedEof`.

use crate::address::Address;
use crate::error::TypesError;
use crate::hash::Hash;

/// Append-only byte sink for serialization.
#[derive(Debug, Default)]
pub struct Sink {
    buf: Vec<u8>,
}

impl Sink {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_var_uint(&mut self, v: u64) {
        if v < 0xFD {
            self.write_u8(v as u8);
        } else if v <= u16::MAX as u64 {
            self.write_u8(0xFD);
            self.write_u16(v as u16);
        } else if v <= u32::MAX as u64 {
            self.write_u8(0xFE);
            self.write_u32(v as u32);
        } else {
            self.write_u8(0xFF);
            self.write_u64(v);
        }
    }

    pub fn write_var_bytes(&mut self, v: &[u8]) {
        self.write_var_uint(v.len() as u64);
        self.write_bytes(v);
    }

    pub fn write_str(&mut self, v: &str) {
        self.write_var_bytes(v.as_bytes());
    }

    pub fn write_address(&mut self, v: &Address) {
        self.write_bytes(v.as_bytes());
    }

    pub fn write_hash(&mut self, v: &Hash) {
        self.write_bytes(v.as_bytes());
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a byte slice for deserialization.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Source<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TypesError> {
        if self.remaining() < n {
            return Err(TypesError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, TypesError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, TypesError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, TypesError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, TypesError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_i64(&mut self) -> Result<i64, TypesError> {
        Ok(self.read_u64()? as i64)
    }

    /// Read a compact var-uint, rejecting non-canonical encodings.
    pub fn read_var_uint(&mut self) -> Result<u64, TypesError> {
        let tag = self.read_u8()?;
        match tag {
            0xFD => {
                let v = self.read_u16()? as u64;
                if v < 0xFD {
                    return Err(TypesError::IrregularData);
                }
                Ok(v)
            }
            0xFE => {
                let v = self.read_u32()? as u64;
                if v <= u16::MAX as u64 {
                    return Err(TypesError::IrregularData);
                }
                Ok(v)
            }
            0xFF => {
                let v = self.read_u64()?;
                if v <= u32::MAX as u64 {
                    return Err(TypesError::IrregularData);
                }
                Ok(v)
            }
            v => Ok(v as u64),
        }
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], TypesError> {
        let len = self.read_var_uint()?;
        if len > usize::MAX as u64 {
            return Err(TypesError::IrregularData);
        }
        self.take(len as usize)
    }

    pub fn read_str(&mut self, field: &'static str) -> Result<String, TypesError> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| TypesError::InvalidUtf8(field))
    }

    pub fn read_address(&mut self) -> Result<Address, TypesError> {
        let bytes = self.take(Address::LEN)?;
        Address::from_slice(bytes)
    }

    pub fn read_hash(&mut self) -> Result<Hash, TypesError> {
        let bytes = self.take(Hash::LEN)?;
        Hash::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_uint_roundtrip() {
        for v in [0u64, 1, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, 0x1_0000_0000] {
            let mut sink = Sink::new();
            sink.write_var_uint(v);
            let mut src = Source::new(sink.bytes());
            assert_eq!(src.read_var_uint().unwrap(), v);
            assert!(src.is_empty());
        }
    }

    #[test]
    fn test_var_uint_non_canonical_rejected() {
        // 5 encoded with the 3-byte form
        let mut src = Source::new(&[0xFD, 0x05, 0x00]);
        assert_eq!(src.read_var_uint(), Err(TypesError::IrregularData));

        // 0xFFFF encoded with the 5-byte form
        let mut src = Source::new(&[0xFE, 0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!(src.read_var_uint(), Err(TypesError::IrregularData));
    }

    #[test]
    fn test_var_bytes_truncated() {
        let mut sink = Sink::new();
        sink.write_var_bytes(b"hello");
        let bytes = sink.into_bytes();
        let mut src = Source::new(&bytes[..4]);
        assert_eq!(src.read_var_bytes(), Err(TypesError::UnexpectedEof));
    }

    #[test]
    fn test_mixed_fields_roundtrip() {
        let addr = Address::from_bytes([7u8; 20]);
        let hash = Hash::compute(b"x");
        let mut sink = Sink::new();
        sink.write_u8(3);
        sink.write_var_bytes(b"payload");
        sink.write_str("name");
        sink.write_address(&addr);
        sink.write_hash(&hash);
        sink.write_u64(42);

        let mut src = Source::new(sink.bytes());
        assert_eq!(src.read_u8().unwrap(), 3);
        assert_eq!(src.read_var_bytes().unwrap(), b"payload");
        assert_eq!(src.read_str("name").unwrap(), "name");
        assert_eq!(src.read_address().unwrap(), addr);
        assert_eq!(src.read_hash().unwrap(), hash);
        assert_eq!(src.read_u64().unwrap(), 42);
        assert!(src.is_empty());
    }
}
