//! Veridian VM - the smart-contract execution layer.
//!
//! Dispatches a transaction's payload to the correct execution engine (a
//! WASM sandbox, a stack-machine bytecode engine, or the native contract
//! registry), meters gas, isolates guest memory from host state, and commits
//! or rolls back a layered state cache depending on success.

pub mod config;
pub mod context;
pub mod crossvm;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod gas_metering;
pub mod host;
mod lifecycle;
pub mod native;
pub mod service;
pub mod stack_engine;
pub mod wasm_engine;

pub use config::VmConfig;
pub use context::ExecutionContext;
pub use dispatcher::{BlockContext, Dispatcher};
pub use error::VmError;
pub use event::{ContractState, EventSink, ExecuteNotify, MemoryEventSink, NotifyEvent};
pub use gas_metering::{GasMeter, GasTable};
pub use service::{ContractService, ContractType, ExecConfig, ServiceRef};
pub use wasm_engine::WasmExecutor;

/// Guest entrypoint export name
pub const ENTRY_NAME: &str = "invoke";

/// Guest linear memory cap, in 64 KiB pages (10 MiB)
pub const WASM_MEMORY_PAGES: u32 = 160;

/// Execution context stack depth cap
pub const CONTEXT_STACK_LIMIT: usize = 1024;

/// Default execution step budget per transaction
pub const EXEC_STEP_LIMIT: u64 = 40_000_000;

/// Compiled-module LRU capacity
pub const CODE_CACHE_SIZE: usize = 100;

/// Notify payloads must stay under this many bytes
pub const MAX_NOTIFY_LENGTH: usize = 64 * 1024;
