use bytes::Bytes;
use veridian_types::Address;

/// One frame of the execution context stack.
///
/// The dispatcher and engines push a frame per contract activation; `current`
/// is the top, `calling` the frame below it, `entry` the bottom (the
/// transaction-initiated contract). Native frames carry no code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub contract_address: Address,
    pub code: Option<Bytes>,
}

impl ExecutionContext {
    pub fn new(contract_address: Address, code: Option<Bytes>) -> Self {
        Self {
            contract_address,
            code,
        }
    }
}
