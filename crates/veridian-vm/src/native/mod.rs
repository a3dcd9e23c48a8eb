//! Built-in contract registry and dispatch.
//!
//! Native contracts are implemented directly by the runtime and identified by
//! reserved low-range addresses. Each registered contract is a registrar
//! function that populates a per-call method map; invocation pushes an
//! execution context frame, runs the handler with a private notification
//! buffer, and re-publishes the handler's notifications to the parent only
//! on success.

pub mod global_params;
pub mod governance;
pub mod ong;

use crate::context::ExecutionContext;
use crate::error::VmError;
use crate::service::ServiceRef;
use std::collections::HashMap;
use veridian_types::{Address, ContractInvokeParam};

/// A native contract method.
pub type Handler = fn(&mut NativeContext) -> Result<Vec<u8>, VmError>;

/// Populates the method map of a native contract for one call.
pub type RegisterFn = fn(&mut NativeContext);

pub fn byte_true() -> Vec<u8> {
    vec![1]
}

pub fn byte_false() -> Vec<u8> {
    vec![0]
}

/// The set of built-in contracts, keyed by reserved address.
pub struct NativeRegistry {
    contracts: HashMap<Address, RegisterFn>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self {
            contracts: HashMap::new(),
        }
    }

    /// Registry with every built-in: the ONG token, global params and
    /// governance.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ong::ONG_CONTRACT_ADDRESS, ong::register);
        registry.register(
            global_params::PARAMS_CONTRACT_ADDRESS,
            global_params::register,
        );
        registry.register(
            governance::GOVERNANCE_CONTRACT_ADDRESS,
            governance::register,
        );
        registry
    }

    pub fn register(&mut self, address: Address, registrar: RegisterFn) {
        self.contracts.insert(address, registrar);
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.contracts.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<RegisterFn> {
        self.contracts.get(address).copied()
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Per-call state handed to native handlers.
pub struct NativeContext {
    service: ServiceRef,
    pub invoke_param: ContractInvokeParam,
    service_map: HashMap<String, Handler>,
}

impl NativeContext {
    pub fn register(&mut self, method: &str, handler: Handler) {
        self.service_map.insert(method.to_string(), handler);
    }

    pub fn service(&self) -> &ServiceRef {
        &self.service
    }

    pub fn args(&self) -> &[u8] {
        &self.invoke_param.args
    }
}

/// Run a native contract method. The registrar resolves the method map, a
/// context frame brackets the handler, and handler notifications survive
/// only on success.
pub fn invoke(service: &ServiceRef, param: ContractInvokeParam) -> Result<Vec<u8>, VmError> {
    let registrar = {
        let svc = service.borrow();
        svc.natives
            .get(&param.address)
            .ok_or(VmError::ContractNotFound(param.address))?
    };

    let address = param.address;
    let method = param.method.clone();
    let mut ctx = NativeContext {
        service: service.clone(),
        invoke_param: param,
        service_map: HashMap::new(),
    };
    registrar(&mut ctx);

    let handler = *ctx.service_map.get(&method).ok_or_else(|| {
        VmError::HostCall(format!(
            "native contract {address} does not support method {method:?}"
        ))
    })?;

    service
        .borrow_mut()
        .push_context(ExecutionContext::new(address, None))?;
    let saved = std::mem::take(&mut service.borrow_mut().notifications);

    let result = handler(&mut ctx);

    let mut svc = service.borrow_mut();
    let own = std::mem::replace(&mut svc.notifications, saved);
    svc.pop_context();
    match result {
        Ok(bytes) => {
            svc.notifications.extend(own);
            Ok(bytes)
        }
        Err(e) => Err(e),
    }
}

/// Convenience wrapper used by the dispatcher's fee and params paths.
pub fn native_call(
    service: &ServiceRef,
    address: Address,
    method: &str,
    args: Vec<u8>,
) -> Result<Vec<u8>, VmError> {
    invoke(
        service,
        ContractInvokeParam {
            version: 0,
            address,
            method: method.to_string(),
            args: args.into(),
        },
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::gas_metering::{GasMeter, GasTable};
    use crate::service::{ContractService, ExecConfig};
    use std::rc::Rc;
    use std::sync::Arc;
    use veridian_storage::{CacheDb, MemLedger, OverlayDB};
    use veridian_types::Hash;

    /// A service over a fresh in-memory overlay, signed by `signer`.
    pub fn test_service(signer: Address) -> ServiceRef {
        let overlay = OverlayDB::shared(Arc::new(MemLedger::new()));
        ContractService::new(
            ExecConfig {
                time: 1_700_000_000,
                height: 42,
                block_hash: Hash::compute(b"block"),
                tx_hash: Hash::compute(b"tx"),
                payer: signer,
                signers: vec![signer],
            },
            CacheDb::new(overlay),
            GasTable::default(),
            GasMeter::unlimited(),
            Rc::new(NativeRegistry::with_builtins()),
        )
        .into_ref()
    }
}
