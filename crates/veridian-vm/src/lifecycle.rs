//! Contract lifecycle host calls: `contract_create`, `contract_migrate`,
//! `contract_destroy`.
//!
//! Create and migrate read the same 14-argument frame out of guest memory:
//! seven (ptr, len) pairs for code and metadata, a raw vm-type flag, and the
//! offset the 20-byte result address is written to. Both pre-charge the
//! creation gas before touching anything beyond the code bytes.

use crate::error::VmError;
use crate::host::{self, read_memory, write_memory, Runtime};
use veridian_types::{Address, DeployCode, TypesError, VmType};
use wasmtime::{Caller, Memory};

fn read_str_field(
    mem: &Memory,
    caller: &Caller<'_, Runtime>,
    ptr: u32,
    len: u32,
    field: &'static str,
) -> Result<String, VmError> {
    let bytes = read_memory(mem, caller, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| VmError::Codec(TypesError::InvalidUtf8(field)))
}

fn iter_err(e: veridian_storage::StorageError) -> VmError {
    VmError::IteratorError(e.to_string())
}

/// Read the deploy frame and pre-charge the creation gas. Shared by create
/// and migrate.
#[allow(clippy::too_many_arguments)]
fn read_deploy_frame(
    mem: &Memory,
    caller: &Caller<'_, Runtime>,
    code_ptr: u32,
    code_len: u32,
    vm_type: u32,
    name_ptr: u32,
    name_len: u32,
    ver_ptr: u32,
    ver_len: u32,
    author_ptr: u32,
    author_len: u32,
    email_ptr: u32,
    email_len: u32,
    desc_ptr: u32,
    desc_len: u32,
) -> Result<DeployCode, VmError> {
    let code = read_memory(mem, caller, code_ptr, code_len)?;

    caller
        .data()
        .service
        .borrow_mut()
        .charge_create(code.len())?;

    let flags = u8::try_from(vm_type)
        .map_err(|_| VmError::HostCall(format!("wrong vm flags: {vm_type}")))?;
    let name = read_str_field(mem, caller, name_ptr, name_len, "name")?;
    let version = read_str_field(mem, caller, ver_ptr, ver_len, "version")?;
    let author = read_str_field(mem, caller, author_ptr, author_len, "author")?;
    let email = read_str_field(mem, caller, email_ptr, email_len, "email")?;
    let description = read_str_field(mem, caller, desc_ptr, desc_len, "description")?;

    DeployCode::with_raw_flags(code, flags, name, version, author, email, description)
        .map_err(VmError::Codec)
}

/// Deploy a new contract from inside a running guest. Returns the number of
/// address bytes written at `out_addr_ptr`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn contract_create(
    mut caller: Caller<'_, Runtime>,
    code_ptr: u32,
    code_len: u32,
    vm_type: u32,
    name_ptr: u32,
    name_len: u32,
    ver_ptr: u32,
    ver_len: u32,
    author_ptr: u32,
    author_len: u32,
    email_ptr: u32,
    email_len: u32,
    desc_ptr: u32,
    desc_len: u32,
    out_addr_ptr: u32,
) -> Result<u32, wasmtime::Error> {
    let mem = crate::host::guest_memory(&caller)?;
    let deploy = read_deploy_frame(
        &mem, &caller, code_ptr, code_len, vm_type, name_ptr, name_len, ver_ptr, ver_len,
        author_ptr, author_len, email_ptr, email_len, desc_ptr, desc_len,
    )?;

    let executor = caller.data().executor.clone();
    if deploy.vm_type() == VmType::Wasm {
        executor.verify_module(deploy.raw_code())?;
    }

    let address = deploy.address();
    {
        let service = caller.data().service.clone();
        let svc = service.borrow();
        if svc
            .cache
            .get_contract(&address)
            .map_err(VmError::Storage)?
            .is_some()
        {
            return Err(VmError::AlreadyDeployed(address).into());
        }
        svc.cache.put_contract(&deploy);
    }

    let written = write_memory(&mem, &mut caller, out_addr_ptr, address.as_bytes())?;
    Ok(written)
}

/// Replace the current contract with new code under a new address,
/// atomically rekeying all of its storage. The old record, keys and cached
/// module are gone once the enclosing transaction commits.
#[allow(clippy::too_many_arguments)]
pub(crate) fn contract_migrate(
    mut caller: Caller<'_, Runtime>,
    code_ptr: u32,
    code_len: u32,
    vm_type: u32,
    name_ptr: u32,
    name_len: u32,
    ver_ptr: u32,
    ver_len: u32,
    author_ptr: u32,
    author_len: u32,
    email_ptr: u32,
    email_len: u32,
    desc_ptr: u32,
    desc_len: u32,
    out_addr_ptr: u32,
) -> Result<u32, wasmtime::Error> {
    let mem = crate::host::guest_memory(&caller)?;
    let deploy = read_deploy_frame(
        &mem, &caller, code_ptr, code_len, vm_type, name_ptr, name_len, ver_ptr, ver_len,
        author_ptr, author_len, email_ptr, email_len, desc_ptr, desc_len,
    )?;

    let service = caller.data().service.clone();
    let executor = caller.data().executor.clone();
    if deploy.vm_type() == VmType::Wasm {
        executor.verify_module(deploy.raw_code())?;
    }

    let new_address = deploy.address();
    let old_address = host::current_address(&service)?;
    {
        let svc = service.borrow();
        if svc
            .cache
            .get_contract(&new_address)
            .map_err(VmError::Storage)?
            .is_some()
        {
            return Err(VmError::AlreadyDeployed(new_address).into());
        }

        svc.cache.put_contract(&deploy);
        svc.cache.delete_contract(&old_address);

        for (key, value) in svc.cache.iter(old_address.as_bytes()).map_err(iter_err)? {
            let mut new_key = new_address.as_bytes().to_vec();
            new_key.extend_from_slice(&key[Address::LEN..]);
            svc.cache.put(&new_key, value);
            svc.cache.delete(&key);
        }
    }
    executor.evict(&old_address);

    let written = write_memory(&mem, &mut caller, out_addr_ptr, new_address.as_bytes())?;
    Ok(written)
}

/// Sweep every key owned by the current contract, drop its record and
/// terminate the VM.
pub(crate) fn contract_destroy(caller: Caller<'_, Runtime>) -> Result<(), wasmtime::Error> {
    let service = caller.data().service.clone();
    let executor = caller.data().executor.clone();
    let address = host::current_address(&service)?;

    {
        let svc = service.borrow();
        for (key, _) in svc.cache.iter(address.as_bytes()).map_err(iter_err)? {
            svc.cache.delete(&key);
        }
        svc.cache.delete_contract(&address);
    }
    executor.evict(&address);

    // the contract is gone; quit the VM
    Err(VmError::Halted.into())
}
