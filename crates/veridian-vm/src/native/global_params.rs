//! The global-params contract: chain-wide string parameters, notably the
//! gas-table overrides.

use super::{byte_true, governance::GOVERNANCE_CONTRACT_ADDRESS, NativeContext};
use crate::error::VmError;
use veridian_storage::CacheDb;
use veridian_types::{Address, Sink, Source, TypesError};

pub const PARAMS_CONTRACT_ADDRESS: Address = Address::native(4);

pub const GET_GLOBAL_PARAM_NAME: &str = "getGlobalParam";
pub const SET_GLOBAL_PARAM_NAME: &str = "setGlobalParam";

const PARAM_PREFIX: u8 = 0x01;

/// Named string parameters, as returned by `getGlobalParam`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pub entries: Vec<(String, String)>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn serialization(&self, sink: &mut Sink) {
        sink.write_var_uint(self.entries.len() as u64);
        for (name, value) in &self.entries {
            sink.write_str(name);
            sink.write_str(value);
        }
    }

    pub fn deserialization(source: &mut Source<'_>) -> Result<Self, TypesError> {
        let count = source.read_var_uint()?;
        let mut entries = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let name = source.read_str("param name")?;
            let value = source.read_str("param value")?;
            entries.push((name, value));
        }
        Ok(Self { entries })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Self::deserialization(&mut Source::new(bytes))
    }
}

fn param_key(name: &str) -> Vec<u8> {
    let mut key = PARAMS_CONTRACT_ADDRESS.as_bytes().to_vec();
    key.push(PARAM_PREFIX);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Seed a parameter directly (genesis bootstrapping and tests).
pub fn init_param(cache: &CacheDb, name: &str, value: &str) {
    cache.put(&param_key(name), value.as_bytes().to_vec());
}

pub fn register(ctx: &mut NativeContext) {
    ctx.register(GET_GLOBAL_PARAM_NAME, get_global_param);
    ctx.register(SET_GLOBAL_PARAM_NAME, set_global_param);
}

/// `getGlobalParam(names) -> Params`. Missing names come back with an empty
/// value so callers can distinguish "unset" without a second round trip.
fn get_global_param(ctx: &mut NativeContext) -> Result<Vec<u8>, VmError> {
    let mut source = Source::new(ctx.args());
    let count = source.read_var_uint().map_err(VmError::Codec)?;
    let mut names = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        names.push(source.read_str("param name").map_err(VmError::Codec)?);
    }

    let svc = ctx.service().borrow();
    let mut params = Params::default();
    for name in names {
        let value = match svc.cache.get(&param_key(&name))? {
            Some(raw) => String::from_utf8(raw)
                .map_err(|_| VmError::Codec(TypesError::InvalidUtf8("param value")))?,
            None => String::new(),
        };
        params.entries.push((name, value));
    }

    let mut sink = Sink::new();
    params.serialization(&mut sink);
    Ok(sink.into_bytes())
}

/// `setGlobalParam(params)` — governance-gated.
fn set_global_param(ctx: &mut NativeContext) -> Result<Vec<u8>, VmError> {
    let params = Params::from_bytes(ctx.args()).map_err(VmError::Codec)?;

    let svc = ctx.service().borrow();
    if !svc.check_witness(&GOVERNANCE_CONTRACT_ADDRESS) {
        return Err(VmError::HostCall(
            "setGlobalParam requires the governance witness".into(),
        ));
    }
    for (name, value) in &params.entries {
        svc.cache.put(&param_key(name), value.as_bytes().to_vec());
    }
    Ok(byte_true())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::native_call;
    use crate::native::testing::test_service;

    fn encode_names(names: &[&str]) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_var_uint(names.len() as u64);
        for name in names {
            sink.write_str(name);
        }
        sink.into_bytes()
    }

    #[test]
    fn test_get_params_reads_seeded_values() {
        let signer = Address::from_bytes([1u8; 20]);
        let service = test_service(signer);
        init_param(&service.borrow().cache, "transaction.min.gas", "12345");

        let raw = native_call(
            &service,
            PARAMS_CONTRACT_ADDRESS,
            GET_GLOBAL_PARAM_NAME,
            encode_names(&["transaction.min.gas", "unset.key"]),
        )
        .unwrap();
        let params = Params::from_bytes(&raw).unwrap();
        assert_eq!(params.get("transaction.min.gas"), Some("12345"));
        assert_eq!(params.get("unset.key"), Some(""));
    }

    #[test]
    fn test_set_params_requires_governance_witness() {
        let signer = Address::from_bytes([1u8; 20]);
        let service = test_service(signer);
        let mut sink = Sink::new();
        Params {
            entries: vec![("k".into(), "v".into())],
        }
        .serialization(&mut sink);

        let err = native_call(
            &service,
            PARAMS_CONTRACT_ADDRESS,
            SET_GLOBAL_PARAM_NAME,
            sink.into_bytes(),
        )
        .unwrap_err();
        assert!(matches!(err, VmError::HostCall(_)));
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let service = test_service(GOVERNANCE_CONTRACT_ADDRESS);
        let mut sink = Sink::new();
        Params {
            entries: vec![("limits.max".into(), "99".into())],
        }
        .serialization(&mut sink);
        native_call(
            &service,
            PARAMS_CONTRACT_ADDRESS,
            SET_GLOBAL_PARAM_NAME,
            sink.into_bytes(),
        )
        .unwrap();

        let raw = native_call(
            &service,
            PARAMS_CONTRACT_ADDRESS,
            GET_GLOBAL_PARAM_NAME,
            encode_names(&["limits.max"]),
        )
        .unwrap();
        let params = Params::from_bytes(&raw).unwrap();
        assert_eq!(params.get("limits.max"), Some("99"));
    }
}
