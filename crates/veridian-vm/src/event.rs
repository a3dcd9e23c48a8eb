//! Execution event records.

use crate::crossvm::Value;
use veridian_types::{Address, Hash};

/// Terminal state of a handled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractState {
    Fail = 0,
    Success = 1,
}

/// A structured event emitted by a contract via the `notify` host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyEvent {
    pub contract: Address,
    pub states: Value,
}

/// Per-transaction execution record: terminal state, the gas actually
/// charged, and every notification published during the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteNotify {
    pub tx_hash: Hash,
    pub state: ContractState,
    pub gas_consumed: u64,
    pub notify: Vec<NotifyEvent>,
}

impl ExecuteNotify {
    pub fn new(tx_hash: Hash) -> Self {
        Self {
            tx_hash,
            state: ContractState::Fail,
            gas_consumed: 0,
            notify: Vec::new(),
        }
    }
}

/// Where finished execution records are published.
pub trait EventSink {
    fn publish(&mut self, notify: &ExecuteNotify);
}

/// In-memory sink for tests and light deployments.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    pub events: Vec<ExecuteNotify>,
}

impl EventSink for MemoryEventSink {
    fn publish(&mut self, notify: &ExecuteNotify) {
        self.events.push(notify.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults_to_fail() {
        let record = ExecuteNotify::new(Hash::ZERO);
        assert_eq!(record.state, ContractState::Fail);
        assert_eq!(record.gas_consumed, 0);
        assert!(record.notify.is_empty());
    }

    #[test]
    fn test_memory_sink_collects() {
        let mut sink = MemoryEventSink::default();
        sink.publish(&ExecuteNotify::new(Hash::compute(b"tx")));
        assert_eq!(sink.events.len(), 1);
    }
}
