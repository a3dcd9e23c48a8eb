//! The persistent ledger backend, consumed as a trait.
//!
//! Production deployments back this with an on-disk store; the execution
//! layer never assumes more than point reads and ordered prefix scans.

use crate::error::StorageError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Read interface of the persistent ledger store.
pub trait LedgerStore: Send + Sync {
    /// Point read.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
}

/// In-memory ledger store used by genesis bootstrapping and tests.
#[derive(Debug, Default)]
pub struct MemLedger {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry directly, bypassing the overlay layers.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.write().insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl LedgerStore for MemLedger {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_ledger_prefix_scan() {
        let ledger = MemLedger::new();
        ledger.put(b"aa1".to_vec(), b"1".to_vec());
        ledger.put(b"aa2".to_vec(), b"2".to_vec());
        ledger.put(b"ab1".to_vec(), b"3".to_vec());

        let hits = ledger.iter_prefix(b"aa").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], (b"aa1".to_vec(), b"1".to_vec()));
        assert_eq!(hits[1], (b"aa2".to_vec(), b"2".to_vec()));
    }

    #[test]
    fn test_mem_ledger_get() {
        let ledger = MemLedger::new();
        assert_eq!(ledger.get(b"missing").unwrap(), None);
        ledger.put(b"k".to_vec(), b"v".to_vec());
        assert_eq!(ledger.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
