use thiserror::Error;

/// Errors that can occur in type operations and wire decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Invalid address length: expected 20, got {0}")]
    InvalidAddressLength(usize),

    #[error("Invalid hash length: expected 32, got {0}")]
    InvalidHashLength(usize),

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Unexpected end of input")]
    UnexpectedEof,

    #[error("Irregular data: non-canonical length prefix")]
    IrregularData,

    #[error("Invalid vm flags: {0}")]
    InvalidVmFlag(u8),

    #[error("{field} too long: {len} > {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
}

impl From<hex::FromHexError> for TypesError {
    fn from(e: hex::FromHexError) -> Self {
        TypesError::InvalidHex(e.to_string())
    }
}
