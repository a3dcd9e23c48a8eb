use thiserror::Error;
use veridian_storage::StorageError;
use veridian_types::{Address, TypesError};

/// Errors that can occur during contract execution and dispatch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Invalid transaction payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Codec(#[from] TypesError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Insufficient balance: balance {balance} < required {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    #[error("Insufficient gas limit: need {needed}, actual {actual}")]
    InsufficientGasLimit { needed: u64, actual: u64 },

    #[error("Out of gas")]
    OutOfGas,

    #[error("Execution step limit exceeded")]
    StepExceeded,

    #[error("Memory access out of bounds: ptr {ptr} + len {len} > size {size}")]
    MemoryOutOfBounds { ptr: u64, len: u64, size: u64 },

    #[error("Contract already deployed: {0}")]
    AlreadyDeployed(Address),

    #[error("Contract not found: {0}")]
    ContractNotFound(Address),

    #[error("Not a wasm contract: {0}")]
    NotAWasmContract(Address),

    #[error("Unsupported contract type")]
    UnsupportedContractType,

    #[error("Invalid wasm module: {0}")]
    InvalidWasm(String),

    #[error("Execution fault: {0}")]
    ExecutionFault(String),

    #[error("Iterator error: {0}")]
    IteratorError(String),

    #[error("Call depth exceeded: {0}")]
    CallDepthExceeded(usize),

    #[error("Host call failed: {0}")]
    HostCall(String),

    /// Internal control-flow marker: the guest requested clean termination
    /// (`return` or `contract_destroy`). Converted back to a success by the
    /// engine driver; it never escapes to callers.
    #[error("Vm halted")]
    Halted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VmError::MemoryOutOfBounds {
            ptr: 10,
            len: 20,
            size: 16,
        };
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn test_codec_error_wraps() {
        let err: VmError = TypesError::UnexpectedEof.into();
        assert_eq!(err, VmError::Codec(TypesError::UnexpectedEof));
    }
}
