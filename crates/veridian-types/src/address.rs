use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// 20-byte account or contract address.
///
/// Contract addresses are content-addressed:
/// `address = blake3(code)[0..20]`.
///
/// The zero address is reserved as "empty". Built-in contracts occupy a
/// fixed low range: 16 zero bytes followed by a 4-byte big-endian id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);
    pub const LEN: usize = 20;

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Create from a byte slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != 20 {
            return Err(TypesError::InvalidAddressLength(slice.len()));
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Derive the content address of a contract from its code bytes.
    /// Uses blake3, takes the first 20 bytes.
    pub fn from_code(code: &[u8]) -> Self {
        let hash = blake3::hash(code);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash.as_bytes()[..20]);
        Self(addr)
    }

    /// Address of a built-in contract with the given id.
    pub const fn native(id: u32) -> Self {
        let mut bytes = [0u8; 20];
        let id = id.to_be_bytes();
        bytes[16] = id[0];
        bytes[17] = id[1];
        bytes[18] = id[2];
        bytes[19] = id[3];
        Self(bytes)
    }

    /// Check if this is the zero address
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Check if this address lies in the built-in contract range
    /// (all zeros except the last 4 bytes)
    pub fn is_native(&self) -> bool {
        self.0[..16].iter().all(|&b| b == 0) && !self.is_zero()
    }

    /// Convert to hex string without 0x prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_zero() {
        assert_eq!(Address::ZERO.as_bytes(), &[0u8; 20]);
        assert!(Address::ZERO.is_zero());
        assert!(!Address::ZERO.is_native());
    }

    #[test]
    fn test_address_from_code_deterministic() {
        let a = Address::from_code(b"some contract code");
        let b = Address::from_code(b"some contract code");
        assert_eq!(a, b);
        assert_ne!(a, Address::from_code(b"other code"));
        assert!(!a.is_zero());
    }

    #[test]
    fn test_address_native_range() {
        let ong = Address::native(2);
        assert!(ong.is_native());
        assert_eq!(ong.as_bytes()[19], 2);

        let mut bytes = [0u8; 20];
        bytes[0] = 1;
        assert!(!Address::from_bytes(bytes).is_native());
    }

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Address::from_bytes([0xabu8; 20]);
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn test_address_from_str_invalid() {
        assert!(Address::from_str("invalid").is_err());
        assert!(Address::from_str("0x1234").is_err());
    }
}
