//! The WASM execution engine: module verification, the compiled-module
//! cache, VM instantiation and the execution driver.

use crate::config::VmConfig;
use crate::context::ExecutionContext;
use crate::error::VmError;
use crate::host::{self, Runtime, HOST_MODULE};
use crate::service::ServiceRef;
use crate::ENTRY_NAME;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::rc::Rc;
use veridian_types::{Address, WasmContractParam};
use wasmtime::{Config, Engine, Linker, Memory, MemoryType, Module, Store, Trap};

/// Compiles, caches and drives guest modules. One executor serves the whole
/// process; the module cache is internally synchronized so block execution
/// may be parallelized upstream.
pub struct WasmExecutor {
    engine: Engine,
    modules: Mutex<LruCache<String, Module>>,
    config: VmConfig,
}

impl WasmExecutor {
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        let mut wt_config = Config::new();
        // fuel carries the execution step budget
        wt_config.consume_fuel(true);
        let engine = Engine::new(&wt_config)
            .map_err(|e| VmError::ExecutionFault(format!("engine setup: {e}")))?;

        let capacity =
            NonZeroUsize::new(config.code_cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            engine,
            modules: Mutex::new(LruCache::new(capacity)),
            config,
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Validate and compile `code` without touching the cache. Used on the
    /// deploy paths, where the code has no address yet.
    pub fn verify_module(&self, code: &[u8]) -> Result<Module, VmError> {
        prevalidate(code)?;
        Module::new(&self.engine, code).map_err(|e| VmError::InvalidWasm(e.to_string()))
    }

    fn load_module(&self, address: &Address, code: &[u8]) -> Result<Module, VmError> {
        let key = address.to_hex();
        if let Some(module) = self.modules.lock().get(&key) {
            return Ok(module.clone());
        }
        let module = self.verify_module(code)?;
        self.modules.lock().put(key, module.clone());
        Ok(module)
    }

    /// Drop the cached module of `address`. Migrate and destroy must call
    /// this; the address may be re-deployed with different code.
    pub fn evict(&self, address: &Address) {
        self.modules.lock().pop(&address.to_hex());
    }

    #[cfg(test)]
    pub(crate) fn cached(&self, address: &Address) -> bool {
        self.modules.lock().contains(&address.to_hex())
    }

    /// Run the `invoke` entry of the contract at `param.address` with
    /// `param.args` as the guest input. Pushes a context frame for the
    /// duration of the run; the frame is popped on every exit path.
    pub fn invoke(
        executor: &Rc<Self>,
        service: &ServiceRef,
        param: WasmContractParam,
    ) -> Result<Vec<u8>, VmError> {
        let code: Bytes = {
            let svc = service.borrow();
            let contract = svc
                .cache
                .get_contract(&param.address)?
                .ok_or(VmError::ContractNotFound(param.address))?;
            contract
                .wasm_code()
                .map_err(|_| VmError::NotAWasmContract(param.address))?
                .clone()
        };

        service.borrow_mut().push_context(ExecutionContext::new(
            param.address,
            Some(code.clone()),
        ))?;
        let result = Self::run(executor, service, &param, &code);
        service.borrow_mut().pop_context();
        result
    }

    fn run(
        executor: &Rc<Self>,
        service: &ServiceRef,
        param: &WasmContractParam,
        code: &Bytes,
    ) -> Result<Vec<u8>, VmError> {
        let module = executor.load_module(&param.address, code)?;

        let runtime = Runtime::new(service.clone(), executor.clone(), param.args.clone());
        let mut store = Store::new(&executor.engine, runtime);
        let steps = service.borrow().meter.exec_step();
        store
            .set_fuel(steps)
            .map_err(|e| VmError::ExecutionFault(e.to_string()))?;

        let mut linker: Linker<Runtime> = Linker::new(&executor.engine);
        host::register(&mut linker)?;

        // the host provides guest linear memory, capped by the page maximum
        let memory = Memory::new(
            &mut store,
            MemoryType::new(2, Some(executor.config.max_memory_pages)),
        )
        .map_err(|e| VmError::ExecutionFault(e.to_string()))?;
        store.data_mut().memory = Some(memory);
        linker
            .define(&mut store, HOST_MODULE, "memory", memory)
            .map_err(|e| VmError::ExecutionFault(e.to_string()))?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| VmError::ExecutionFault(format!("instantiation: {e}")))?;
        let entry = instance
            .get_typed_func::<(), ()>(&mut store, ENTRY_NAME)
            .map_err(|e| VmError::InvalidWasm(format!("entry {ENTRY_NAME:?}: {e}")))?;

        let call_result = entry.call(&mut store, ());

        // settle the step budget back into the shared meter
        let fuel_left = store.get_fuel().unwrap_or(0);
        let step_charge = service.borrow_mut().meter.burn_steps(fuel_left);

        match call_result {
            Ok(()) => {
                step_charge?;
                Ok(store.into_data().output)
            }
            Err(err) => match trap_to_error(err) {
                VmError::Halted => {
                    step_charge?;
                    Ok(store.into_data().output)
                }
                other => Err(other),
            },
        }
    }
}

/// The single catch point converting guest traps into typed errors.
fn trap_to_error(err: wasmtime::Error) -> VmError {
    match err.downcast::<VmError>() {
        Ok(vm) => vm,
        Err(err) => match err.downcast::<Trap>() {
            Ok(Trap::OutOfFuel) => VmError::StepExceeded,
            Ok(trap) => VmError::ExecutionFault(trap.to_string()),
            Err(other) => VmError::ExecutionFault(other.to_string()),
        },
    }
}

/// Structural validation ahead of compilation: no start section, imports
/// only from the host module, exactly one export — the `invoke` function,
/// taking no parameters and returning nothing.
fn prevalidate(code: &[u8]) -> Result<(), VmError> {
    use wasmparser::{ExternalKind, Parser, Payload, TypeRef};

    fn parse_err(e: wasmparser::BinaryReaderError) -> VmError {
        VmError::InvalidWasm(e.to_string())
    }

    let mut func_types: Vec<wasmparser::FuncType> = Vec::new();
    let mut imported_funcs: u32 = 0;
    let mut local_func_types: Vec<u32> = Vec::new();
    let mut exports: Vec<(String, ExternalKind, u32)> = Vec::new();

    for payload in Parser::new(0).parse_all(code) {
        match payload.map_err(parse_err)? {
            Payload::TypeSection(reader) => {
                for ty in reader.into_iter_err_on_gc_types() {
                    func_types.push(ty.map_err(parse_err)?);
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.map_err(parse_err)?;
                    if import.module != HOST_MODULE {
                        return Err(VmError::InvalidWasm(format!(
                            "import from unknown module {:?}",
                            import.module
                        )));
                    }
                    if let TypeRef::Func(_) = import.ty {
                        imported_funcs += 1;
                    }
                }
            }
            Payload::FunctionSection(reader) => {
                for ty_index in reader {
                    local_func_types.push(ty_index.map_err(parse_err)?);
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.map_err(parse_err)?;
                    exports.push((export.name.to_string(), export.kind, export.index));
                }
            }
            Payload::StartSection { .. } => {
                return Err(VmError::InvalidWasm("start section is not allowed".into()));
            }
            _ => {}
        }
    }

    if exports.len() != 1 {
        return Err(VmError::InvalidWasm(format!(
            "module must export exactly one entry, found {}",
            exports.len()
        )));
    }
    let (name, kind, index) = &exports[0];
    if name != ENTRY_NAME || *kind != ExternalKind::Func {
        return Err(VmError::InvalidWasm(format!(
            "the only export must be the {ENTRY_NAME:?} function"
        )));
    }
    let entry_type = index
        .checked_sub(imported_funcs)
        .and_then(|local| local_func_types.get(local as usize))
        .and_then(|ty_index| func_types.get(*ty_index as usize))
        .ok_or_else(|| VmError::InvalidWasm("entry function index out of range".into()))?;
    if !entry_type.params().is_empty() || !entry_type.results().is_empty() {
        return Err(VmError::InvalidWasm(
            "entry function must take no parameters and return nothing".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wasm(wat: &str) -> Vec<u8> {
        wat::parse_str(wat).unwrap()
    }

    #[test]
    fn test_prevalidate_accepts_minimal_module() {
        let code = wasm(r#"(module (func (export "invoke")))"#);
        assert!(prevalidate(&code).is_ok());
    }

    #[test]
    fn test_prevalidate_accepts_env_imports() {
        let code = wasm(
            r#"(module
                (import "env" "memory" (memory 1))
                (import "env" "timestamp" (func $ts (result i64)))
                (func (export "invoke") (drop (call $ts))))"#,
        );
        assert!(prevalidate(&code).is_ok());
    }

    #[test]
    fn test_prevalidate_rejects_start_section() {
        let code = wasm(r#"(module (func $s) (start $s) (func (export "invoke")))"#);
        assert!(matches!(prevalidate(&code), Err(VmError::InvalidWasm(_))));
    }

    #[test]
    fn test_prevalidate_rejects_foreign_imports() {
        let code = wasm(
            r#"(module
                (import "wasi" "clock" (func (result i64)))
                (func (export "invoke")))"#,
        );
        assert!(matches!(prevalidate(&code), Err(VmError::InvalidWasm(_))));
    }

    #[test]
    fn test_prevalidate_rejects_extra_exports() {
        let code = wasm(
            r#"(module
                (func (export "invoke"))
                (func (export "other")))"#,
        );
        assert!(matches!(prevalidate(&code), Err(VmError::InvalidWasm(_))));
    }

    #[test]
    fn test_prevalidate_rejects_wrong_entry_name() {
        let code = wasm(r#"(module (func (export "main")))"#);
        assert!(matches!(prevalidate(&code), Err(VmError::InvalidWasm(_))));
    }

    #[test]
    fn test_prevalidate_rejects_entry_signature() {
        let code = wasm(r#"(module (func (export "invoke") (result i32) (i32.const 0)))"#);
        assert!(matches!(prevalidate(&code), Err(VmError::InvalidWasm(_))));
    }

    #[test]
    fn test_verify_module_compiles() {
        let executor = WasmExecutor::new(VmConfig::default()).unwrap();
        let code = wasm(r#"(module (func (export "invoke")))"#);
        assert!(executor.verify_module(&code).is_ok());
        assert!(executor.verify_module(b"not wasm").is_err());
    }

    #[test]
    fn test_module_cache_and_evict() {
        let executor = WasmExecutor::new(VmConfig::default()).unwrap();
        let code = wasm(r#"(module (func (export "invoke")))"#);
        let address = Address::from_code(&code);

        assert!(!executor.cached(&address));
        executor.load_module(&address, &code).unwrap();
        assert!(executor.cached(&address));
        executor.evict(&address);
        assert!(!executor.cached(&address));
    }
}
