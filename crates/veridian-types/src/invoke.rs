//! Invoke parameter records shared between engines.

use crate::address::Address;
use crate::codec::{Sink, Source};
use crate::error::TypesError;
use bytes::Bytes;

/// Invocation of a native (built-in) contract method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInvokeParam {
    pub version: u8,
    pub address: Address,
    pub method: String,
    pub args: Bytes,
}

impl ContractInvokeParam {
    pub fn serialization(&self, sink: &mut Sink) {
        sink.write_u8(self.version);
        sink.write_address(&self.address);
        sink.write_str(&self.method);
        sink.write_var_bytes(&self.args);
    }

    pub fn deserialization(source: &mut Source<'_>) -> Result<Self, TypesError> {
        let version = source.read_u8()?;
        let address = source.read_address()?;
        let method = source.read_str("method")?;
        let args = source.read_var_bytes()?.to_vec();
        Ok(Self {
            version,
            address,
            method,
            args: args.into(),
        })
    }
}

/// Invocation of a WASM contract: the target address and an opaque argument
/// buffer handed to the guest unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmContractParam {
    pub address: Address,
    pub args: Bytes,
}

impl WasmContractParam {
    pub fn serialization(&self, sink: &mut Sink) {
        sink.write_address(&self.address);
        sink.write_var_bytes(&self.args);
    }

    pub fn deserialization(source: &mut Source<'_>) -> Result<Self, TypesError> {
        let address = source.read_address()?;
        let args = source.read_var_bytes()?.to_vec();
        Ok(Self {
            address,
            args: args.into(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        self.serialization(&mut sink);
        sink.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Self::deserialization(&mut Source::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wasm_param_roundtrip() {
        let param = WasmContractParam {
            address: Address::from_bytes([5u8; 20]),
            args: Bytes::from_static(b"args"),
        };
        let back = WasmContractParam::from_bytes(&param.to_bytes()).unwrap();
        assert_eq!(param, back);
    }

    #[test]
    fn test_invoke_param_roundtrip() {
        let param = ContractInvokeParam {
            version: 0,
            address: Address::native(2),
            method: "transfer".into(),
            args: Bytes::from_static(&[1, 2, 3]),
        };
        let mut sink = Sink::new();
        param.serialization(&mut sink);
        let back = ContractInvokeParam::deserialization(&mut Source::new(sink.bytes())).unwrap();
        assert_eq!(param, back);
    }

    #[test]
    fn test_wasm_param_truncated() {
        let param = WasmContractParam {
            address: Address::from_bytes([5u8; 20]),
            args: Bytes::from_static(b"args"),
        };
        let bytes = param.to_bytes();
        assert_eq!(
            WasmContractParam::from_bytes(&bytes[..10]),
            Err(TypesError::UnexpectedEof)
        );
    }
}
