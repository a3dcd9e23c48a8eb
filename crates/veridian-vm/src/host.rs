//! The host/guest boundary: every capability exported to sandboxed WASM
//! code under the synthetic `env` module.
//!
//! All pointers are guest linear-memory offsets and every pointer/length
//! pair is validated against the memory size before access. Host state lives
//! in [`Runtime`]; errors raised here unwind the guest and are converted to
//! typed errors at the engine driver's single catch point.

use crate::crossvm;
use crate::error::VmError;
use crate::event::NotifyEvent;
use crate::gas_metering::{
    BLOCK_HEIGHT_GAS, CALLER_ADDRESS_GAS, CALL_CONTRACT_GAS, CHECKWITNESS_GAS,
    CURRENT_BLOCK_HASH_GAS, CURRENT_TX_HASH_GAS, ENTRY_ADDRESS_GAS, NATIVE_INVOKE_GAS,
    SELF_ADDRESS_GAS, SHA256_GAS, STORAGE_DELETE_GAS, STORAGE_PUT_GAS, STORAGE_READ_GAS,
    TIME_STAMP_GAS,
};
use crate::lifecycle;
use crate::native;
use crate::service::{ContractType, ServiceRef};
use crate::stack_engine;
use crate::wasm_engine::WasmExecutor;
use crate::MAX_NOTIFY_LENGTH;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::rc::Rc;
use veridian_types::{Address, ContractInvokeParam, Source, WasmContractParam};
use wasmtime::{Caller, Linker, Memory};

/// The synthetic module name guest imports resolve against.
pub const HOST_MODULE: &str = "env";

/// Host-side state of one VM activation.
pub struct Runtime {
    pub service: ServiceRef,
    pub executor: Rc<WasmExecutor>,
    pub memory: Option<Memory>,
    /// The current call's input buffer
    pub input: Bytes,
    /// Set by the guest through `return`
    pub output: Vec<u8>,
    /// Return buffer of the last sub-call
    pub call_output: Vec<u8>,
}

impl Runtime {
    pub fn new(service: ServiceRef, executor: Rc<WasmExecutor>, input: Bytes) -> Self {
        Self {
            service,
            executor,
            memory: None,
            input,
            output: Vec::new(),
            call_output: Vec::new(),
        }
    }
}

pub(crate) fn guest_memory(caller: &Caller<'_, Runtime>) -> Result<Memory, VmError> {
    caller
        .data()
        .memory
        .ok_or_else(|| VmError::HostCall("guest memory not attached".into()))
}

pub(crate) fn read_memory(
    mem: &Memory,
    caller: &Caller<'_, Runtime>,
    ptr: u32,
    len: u32,
) -> Result<Vec<u8>, VmError> {
    let size = mem.data_size(caller) as u64;
    let (ptr64, len64) = (ptr as u64, len as u64);
    if ptr64 + len64 > size {
        return Err(VmError::MemoryOutOfBounds {
            ptr: ptr64,
            len: len64,
            size,
        });
    }
    Ok(mem.data(caller)[ptr as usize..(ptr as usize + len as usize)].to_vec())
}

pub(crate) fn write_memory(
    mem: &Memory,
    caller: &mut Caller<'_, Runtime>,
    ptr: u32,
    data: &[u8],
) -> Result<u32, VmError> {
    let size = mem.data_size(&*caller) as u64;
    let (ptr64, len64) = (ptr as u64, data.len() as u64);
    if ptr64 + len64 > size {
        return Err(VmError::MemoryOutOfBounds {
            ptr: ptr64,
            len: len64,
            size,
        });
    }
    mem.data_mut(caller)[ptr as usize..ptr as usize + data.len()].copy_from_slice(data);
    Ok(data.len() as u32)
}

/// Storage keys of contract-owned state are transparently prefixed by the
/// owning contract's address; guests cannot forge keys into another
/// contract's subspace.
fn storage_key(contract: &Address, key: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(Address::LEN + key.len());
    framed.extend_from_slice(contract.as_bytes());
    framed.extend_from_slice(key);
    framed
}

pub(crate) fn current_address(service: &ServiceRef) -> Result<Address, VmError> {
    service
        .borrow()
        .current_context()
        .map(|ctx| ctx.contract_address)
        .ok_or_else(|| VmError::HostCall("no execution context".into()))
}

/// Register every host function on the linker.
pub(crate) fn register(linker: &mut Linker<Runtime>) -> Result<(), VmError> {
    fn link_err(e: wasmtime::Error) -> VmError {
        VmError::ExecutionFault(format!("linker: {e}"))
    }

    linker
        .func_wrap(HOST_MODULE, "timestamp", timestamp)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "block_height", block_height)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "self_address", self_address)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "caller_address", caller_address)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "entry_address", entry_address)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "input_length", input_length)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "get_input", get_input)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "call_output_length", call_output_length)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "get_call_output", get_call_output)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "check_witness", check_witness)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "current_blockhash", current_blockhash)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "current_txhash", current_txhash)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "return", ret)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "notify", notify)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "debug", debug)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "panic", raise_exception)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "storage_read", storage_read)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "storage_write", storage_write)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "storage_delete", storage_delete)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "sha256", sha256)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "call_contract", call_contract)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "contract_create", lifecycle::contract_create)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "contract_migrate", lifecycle::contract_migrate)
        .map_err(link_err)?;
    linker
        .func_wrap(HOST_MODULE, "contract_destroy", lifecycle::contract_destroy)
        .map_err(link_err)?;
    Ok(())
}

fn timestamp(caller: Caller<'_, Runtime>) -> Result<u64, wasmtime::Error> {
    let service = caller.data().service.clone();
    let mut svc = service.borrow_mut();
    svc.charge_host("timestamp", TIME_STAMP_GAS)?;
    Ok(svc.config.time as u64)
}

fn block_height(caller: Caller<'_, Runtime>) -> Result<u32, wasmtime::Error> {
    let service = caller.data().service.clone();
    let mut svc = service.borrow_mut();
    svc.charge_host("block_height", BLOCK_HEIGHT_GAS)?;
    Ok(svc.config.height)
}

fn self_address(mut caller: Caller<'_, Runtime>, dst: u32) -> Result<(), wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let service = caller.data().service.clone();
    let address = {
        let mut svc = service.borrow_mut();
        svc.charge_host("self_address", SELF_ADDRESS_GAS)?;
        svc.current_context()
            .map(|ctx| ctx.contract_address)
            .ok_or_else(|| VmError::HostCall("no execution context".into()))?
    };
    write_memory(&mem, &mut caller, dst, address.as_bytes())?;
    Ok(())
}

fn caller_address(mut caller: Caller<'_, Runtime>, dst: u32) -> Result<(), wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let service = caller.data().service.clone();
    let address = {
        let mut svc = service.borrow_mut();
        svc.charge_host("caller_address", CALLER_ADDRESS_GAS)?;
        // the zero address when nothing is below the current frame
        svc.calling_context()
            .map(|ctx| ctx.contract_address)
            .unwrap_or(Address::ZERO)
    };
    write_memory(&mem, &mut caller, dst, address.as_bytes())?;
    Ok(())
}

fn entry_address(mut caller: Caller<'_, Runtime>, dst: u32) -> Result<(), wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let service = caller.data().service.clone();
    let address = {
        let mut svc = service.borrow_mut();
        svc.charge_host("entry_address", ENTRY_ADDRESS_GAS)?;
        svc.entry_context()
            .map(|ctx| ctx.contract_address)
            .ok_or_else(|| VmError::HostCall("entry address requires an execution context".into()))?
    };
    write_memory(&mem, &mut caller, dst, address.as_bytes())?;
    Ok(())
}

fn input_length(caller: Caller<'_, Runtime>) -> Result<u32, wasmtime::Error> {
    Ok(caller.data().input.len() as u32)
}

fn get_input(mut caller: Caller<'_, Runtime>, dst: u32) -> Result<(), wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let input = caller.data().input.clone();
    write_memory(&mem, &mut caller, dst, &input)?;
    Ok(())
}

fn call_output_length(caller: Caller<'_, Runtime>) -> Result<u32, wasmtime::Error> {
    Ok(caller.data().call_output.len() as u32)
}

fn get_call_output(mut caller: Caller<'_, Runtime>, dst: u32) -> Result<(), wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let output = caller.data().call_output.clone();
    write_memory(&mem, &mut caller, dst, &output)?;
    Ok(())
}

fn check_witness(caller: Caller<'_, Runtime>, ptr: u32) -> Result<u32, wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let service = caller.data().service.clone();
    service
        .borrow_mut()
        .charge_host("check_witness", CHECKWITNESS_GAS)?;

    let bytes = read_memory(&mem, &caller, ptr, Address::LEN as u32)?;
    let address = Address::from_slice(&bytes).map_err(VmError::Codec)?;
    let result = service.borrow().check_witness(&address) as u32;
    Ok(result)
}

fn current_blockhash(mut caller: Caller<'_, Runtime>, dst: u32) -> Result<u32, wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let service = caller.data().service.clone();
    let hash = {
        let mut svc = service.borrow_mut();
        svc.charge_host("current_blockhash", CURRENT_BLOCK_HASH_GAS)?;
        svc.config.block_hash
    };
    let written = write_memory(&mem, &mut caller, dst, hash.as_bytes())?;
    Ok(written)
}

fn current_txhash(mut caller: Caller<'_, Runtime>, dst: u32) -> Result<u32, wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let service = caller.data().service.clone();
    let hash = {
        let mut svc = service.borrow_mut();
        svc.charge_host("current_txhash", CURRENT_TX_HASH_GAS)?;
        svc.config.tx_hash
    };
    let written = write_memory(&mem, &mut caller, dst, hash.as_bytes())?;
    Ok(written)
}

/// Set the guest output buffer and terminate the VM cleanly.
fn ret(mut caller: Caller<'_, Runtime>, ptr: u32, len: u32) -> Result<(), wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let bytes = read_memory(&mem, &caller, ptr, len)?;
    caller.data_mut().output = bytes;
    Err(VmError::Halted.into())
}

fn notify(caller: Caller<'_, Runtime>, ptr: u32, len: u32) -> Result<(), wasmtime::Error> {
    if len as usize >= MAX_NOTIFY_LENGTH {
        return Err(VmError::HostCall("notify payload over the limit".into()).into());
    }
    let mem = guest_memory(&caller)?;
    let bytes = read_memory(&mem, &caller, ptr, len)?;

    let service = caller.data().service.clone();
    let mut svc = service.borrow_mut();
    let contract = svc
        .current_context()
        .map(|ctx| ctx.contract_address)
        .ok_or_else(|| VmError::HostCall("no execution context".into()))?;
    let states = crossvm::deserialize_notify(&bytes);
    svc.push_notifications(vec![NotifyEvent { contract, states }]);
    Ok(())
}

/// Observer log; never traps.
fn debug(caller: Caller<'_, Runtime>, ptr: u32, len: u32) -> Result<(), wasmtime::Error> {
    let Ok(mem) = guest_memory(&caller) else {
        return Ok(());
    };
    if let Ok(bytes) = read_memory(&mem, &caller, ptr, len) {
        tracing::debug!(target: "contract", message = %String::from_utf8_lossy(&bytes));
    }
    Ok(())
}

/// Trap with a guest-supplied message.
fn raise_exception(caller: Caller<'_, Runtime>, ptr: u32, len: u32) -> Result<(), wasmtime::Error> {
    let message = guest_memory(&caller)
        .and_then(|mem| read_memory(&mem, &caller, ptr, len))
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    Err(VmError::HostCall(format!("contract panic: {message}")).into())
}

fn sha256(
    mut caller: Caller<'_, Runtime>,
    src: u32,
    slen: u32,
    dst: u32,
) -> Result<(), wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let service = caller.data().service.clone();
    {
        let mut svc = service.borrow_mut();
        let unit = svc.gas_table.cost("sha256", SHA256_GAS);
        let cost = (slen as u64 / 1024 + 1) * unit;
        svc.charge(cost)?;
    }
    let bytes = read_memory(&mem, &caller, src, slen)?;
    let digest = Sha256::digest(&bytes);
    write_memory(&mem, &mut caller, dst, &digest)?;
    Ok(())
}

fn storage_read(
    mut caller: Caller<'_, Runtime>,
    key_ptr: u32,
    key_len: u32,
    val_ptr: u32,
    val_len: u32,
    offset: u32,
) -> Result<u32, wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let key = read_memory(&mem, &caller, key_ptr, key_len)?;

    let service = caller.data().service.clone();
    let value = {
        let mut svc = service.borrow_mut();
        let contract = svc
            .current_context()
            .map(|ctx| ctx.contract_address)
            .ok_or_else(|| VmError::HostCall("no execution context".into()))?;
        let value = svc
            .cache
            .get(&storage_key(&contract, &key))
            .map_err(VmError::Storage)?;
        let Some(value) = value else {
            return Ok(u32::MAX);
        };
        // cost proportional to the value read
        let unit = svc.gas_table.cost("storage_read", STORAGE_READ_GAS);
        svc.charge((value.len() as u64 / 1024 + 1) * unit)?;
        value
    };

    let offset = offset as usize;
    if offset > value.len() {
        return Err(VmError::HostCall("storage read offset out of range".into()).into());
    }
    let n = (value.len() - offset).min(val_len as usize);
    write_memory(&mem, &mut caller, val_ptr, &value[offset..offset + n])?;
    Ok(value.len() as u32)
}

fn storage_write(
    caller: Caller<'_, Runtime>,
    key_ptr: u32,
    key_len: u32,
    val_ptr: u32,
    val_len: u32,
) -> Result<(), wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let key = read_memory(&mem, &caller, key_ptr, key_len)?;
    let value = read_memory(&mem, &caller, val_ptr, val_len)?;

    let service = caller.data().service.clone();
    let mut svc = service.borrow_mut();
    let unit = svc.gas_table.cost("storage_write", STORAGE_PUT_GAS);
    let cost = ((key_len as u64 + val_len as u64) / 1024 + 1) * unit;
    svc.charge(cost)?;

    let contract = svc
        .current_context()
        .map(|ctx| ctx.contract_address)
        .ok_or_else(|| VmError::HostCall("no execution context".into()))?;
    svc.cache.put(&storage_key(&contract, &key), value);
    Ok(())
}

fn storage_delete(
    caller: Caller<'_, Runtime>,
    key_ptr: u32,
    key_len: u32,
) -> Result<(), wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let key = read_memory(&mem, &caller, key_ptr, key_len)?;

    let service = caller.data().service.clone();
    let mut svc = service.borrow_mut();
    svc.charge_host("storage_delete", STORAGE_DELETE_GAS)?;
    let contract = svc
        .current_context()
        .map(|ctx| ctx.contract_address)
        .ok_or_else(|| VmError::HostCall("no execution context".into()))?;
    svc.cache.delete(&storage_key(&contract, &key));
    Ok(())
}

/// Cross-contract call: resolve the target's engine, run it with a child
/// context and the shared meter, surface its return through `call_output`.
fn call_contract(
    mut caller: Caller<'_, Runtime>,
    addr_ptr: u32,
    input_ptr: u32,
    input_len: u32,
) -> Result<u32, wasmtime::Error> {
    let mem = guest_memory(&caller)?;
    let address =
        Address::from_slice(&read_memory(&mem, &caller, addr_ptr, Address::LEN as u32)?)
            .map_err(VmError::Codec)?;
    let input = read_memory(&mem, &caller, input_ptr, input_len)?;

    let service = caller.data().service.clone();
    let executor = caller.data().executor.clone();

    let contract_type = {
        let mut svc = service.borrow_mut();
        svc.charge_host("call_contract", CALL_CONTRACT_GAS)?;
        // hand the step budget down to the shared meter before nesting
        let fuel = caller.get_fuel()?;
        svc.meter.burn_steps(fuel)?;
        svc.contract_type(&address)?
    };

    let result = match contract_type {
        ContractType::Native => {
            let mut source = Source::new(&input);
            let version = source.read_u8().map_err(VmError::Codec)?;
            let method = source.read_str("method").map_err(VmError::Codec)?;
            let args = source.read_var_bytes().map_err(VmError::Codec)?.to_vec();
            service
                .borrow_mut()
                .charge_host("native_invoke", NATIVE_INVOKE_GAS)?;
            native::invoke(
                &service,
                ContractInvokeParam {
                    version,
                    address,
                    method,
                    args: args.into(),
                },
            )?
        }
        ContractType::Wasm => WasmExecutor::invoke(
            &executor,
            &service,
            WasmContractParam {
                address,
                args: input.into(),
            },
        )?,
        ContractType::Stack => {
            let value = stack_engine::invoke(&service, address, &input)?;
            crossvm::serialize_value(&value)
        }
    };

    // restore what the nested engines left of the step budget
    caller.set_fuel(service.borrow().meter.exec_step())?;

    let len = result.len() as u32;
    caller.data_mut().call_output = result;
    Ok(len)
}
