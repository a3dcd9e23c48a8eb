//! Shared serialization of call arguments and return values across VM types.
//!
//! Values crossing an engine boundary (stack-engine parameters and results,
//! notification payloads) are encoded as a version byte followed by one
//! tagged value. Lengths are u32 little-endian; lists nest up to a fixed
//! depth.

use veridian_types::{Address, Hash, Sink, Source, TypesError};

pub const VERSION: u8 = 0;

const TYPE_BYTES: u8 = 0x00;
const TYPE_STRING: u8 = 0x01;
const TYPE_ADDRESS: u8 = 0x02;
const TYPE_BOOL: u8 = 0x03;
const TYPE_INT: u8 = 0x04;
const TYPE_H256: u8 = 0x05;
const TYPE_LIST: u8 = 0x10;

/// Maximum nesting depth of encoded lists.
pub const MAX_NESTED_DEPTH: usize = 32;

/// A tagged value understood by every engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    String(String),
    Address(Address),
    Bool(bool),
    Int(i64),
    H256(Hash),
    List(Vec<Value>),
}

impl Value {
    fn encode_into(&self, sink: &mut Sink) {
        match self {
            Value::Bytes(b) => {
                sink.write_u8(TYPE_BYTES);
                sink.write_u32(b.len() as u32);
                sink.write_bytes(b);
            }
            Value::String(s) => {
                sink.write_u8(TYPE_STRING);
                sink.write_u32(s.len() as u32);
                sink.write_bytes(s.as_bytes());
            }
            Value::Address(a) => {
                sink.write_u8(TYPE_ADDRESS);
                sink.write_address(a);
            }
            Value::Bool(b) => {
                sink.write_u8(TYPE_BOOL);
                sink.write_u8(*b as u8);
            }
            Value::Int(i) => {
                sink.write_u8(TYPE_INT);
                sink.write_i64(*i);
            }
            Value::H256(h) => {
                sink.write_u8(TYPE_H256);
                sink.write_hash(h);
            }
            Value::List(items) => {
                sink.write_u8(TYPE_LIST);
                sink.write_u32(items.len() as u32);
                for item in items {
                    item.encode_into(sink);
                }
            }
        }
    }

    fn decode(source: &mut Source<'_>, depth: usize) -> Result<Self, TypesError> {
        if depth > MAX_NESTED_DEPTH {
            return Err(TypesError::IrregularData);
        }
        let tag = source.read_u8()?;
        match tag {
            TYPE_BYTES => {
                let len = source.read_u32()? as usize;
                let mut bytes = Vec::with_capacity(len.min(64 * 1024));
                for _ in 0..len {
                    bytes.push(source.read_u8()?);
                }
                Ok(Value::Bytes(bytes))
            }
            TYPE_STRING => {
                let len = source.read_u32()? as usize;
                let mut bytes = Vec::with_capacity(len.min(64 * 1024));
                for _ in 0..len {
                    bytes.push(source.read_u8()?);
                }
                String::from_utf8(bytes)
                    .map(Value::String)
                    .map_err(|_| TypesError::InvalidUtf8("string value"))
            }
            TYPE_ADDRESS => Ok(Value::Address(source.read_address()?)),
            TYPE_BOOL => Ok(Value::Bool(source.read_u8()? != 0)),
            TYPE_INT => Ok(Value::Int(source.read_i64()?)),
            TYPE_H256 => Ok(Value::H256(source.read_hash()?)),
            TYPE_LIST => {
                let count = source.read_u32()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(Self::decode(source, depth + 1)?);
                }
                Ok(Value::List(items))
            }
            _ => Err(TypesError::IrregularData),
        }
    }
}

/// Encode a value with the codec version prefix.
pub fn serialize_value(value: &Value) -> Vec<u8> {
    let mut sink = Sink::new();
    sink.write_u8(VERSION);
    value.encode_into(&mut sink);
    sink.into_bytes()
}

/// Decode a version-prefixed value, requiring full consumption.
pub fn deserialize_value(bytes: &[u8]) -> Result<Value, TypesError> {
    let mut source = Source::new(bytes);
    let version = source.read_u8()?;
    if version != VERSION {
        return Err(TypesError::IrregularData);
    }
    let value = Value::decode(&mut source, 0)?;
    if !source.is_empty() {
        return Err(TypesError::IrregularData);
    }
    Ok(value)
}

/// Decode a notification payload. Payloads that do not parse as an encoded
/// value are carried verbatim as raw bytes; guests may notify free-form
/// data.
pub fn deserialize_notify(bytes: &[u8]) -> Value {
    match deserialize_value(bytes) {
        Ok(value) => value,
        Err(_) => Value::Bytes(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_primitives() {
        for value in [
            Value::Bytes(vec![1, 2, 3]),
            Value::String("hello".into()),
            Value::Address(Address::from_bytes([9u8; 20])),
            Value::Bool(true),
            Value::Int(-42),
            Value::H256(Hash::compute(b"h")),
        ] {
            let bytes = serialize_value(&value);
            assert_eq!(deserialize_value(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_roundtrip_nested_list() {
        let value = Value::List(vec![
            Value::String("transfer".into()),
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            Value::Bytes(vec![0xff]),
        ]);
        let bytes = serialize_value(&value);
        assert_eq!(deserialize_value(&bytes).unwrap(), value);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = serialize_value(&Value::Bool(false));
        bytes.push(0);
        assert!(deserialize_value(&bytes).is_err());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(deserialize_value(&[VERSION, 0x77]).is_err());
    }

    #[test]
    fn test_notify_falls_back_to_raw_bytes() {
        let raw = b"free-form log line".to_vec();
        assert_eq!(deserialize_notify(&raw), Value::Bytes(raw.clone()));

        let encoded = serialize_value(&Value::Int(7));
        assert_eq!(deserialize_notify(&encoded), Value::Int(7));
    }
}
