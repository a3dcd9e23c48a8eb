//! Block-scoped write layer over the persistent ledger.

use crate::error::StorageError;
use crate::ledger::LedgerStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Handle shared between the dispatcher and every cache opened during a
/// block.
pub type SharedOverlay = Arc<RwLock<OverlayDB>>;

/// The mid-layer write cache over the underlying ledger store.
///
/// Writes from committed transaction caches land here; a `None` value is a
/// tombstone shadowing the backend. The overlay also carries a sticky error
/// flag: some handler paths must record a catastrophic condition (a missing
/// gas-table entry) without failing the enclosing block, and the outer
/// ledger checks the flag before persisting.
pub struct OverlayDB {
    backend: Arc<dyn LedgerStore>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    error: Option<StorageError>,
}

impl OverlayDB {
    pub fn new(backend: Arc<dyn LedgerStore>) -> Self {
        Self {
            backend,
            writes: BTreeMap::new(),
            error: None,
        }
    }

    pub fn shared(backend: Arc<dyn LedgerStore>) -> SharedOverlay {
        Arc::new(RwLock::new(Self::new(backend)))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        match self.writes.get(key) {
            Some(Some(v)) => Ok(Some(v.clone())),
            Some(None) => Ok(None),
            None => self.backend.get(key),
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Merged view of backend and overlay writes under `prefix`, ascending.
    pub fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .backend
            .iter_prefix(prefix)?
            .into_iter()
            .collect();
        for (k, v) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match v {
                Some(v) => {
                    merged.insert(k.clone(), v.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Record a catastrophic condition without failing the block.
    pub fn set_error(&mut self, err: StorageError) {
        tracing::error!(error = %err, "overlay marked errored");
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn error(&self) -> Option<&StorageError> {
        self.error.as_ref()
    }

    /// Number of pending writes (including tombstones).
    pub fn pending(&self) -> usize {
        self.writes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemLedger;

    fn overlay_over(entries: &[(&[u8], &[u8])]) -> OverlayDB {
        let ledger = MemLedger::new();
        for (k, v) in entries {
            ledger.put(k.to_vec(), v.to_vec());
        }
        OverlayDB::new(Arc::new(ledger))
    }

    #[test]
    fn test_overlay_layering() {
        let mut overlay = overlay_over(&[(b"a", b"backend")]);
        assert_eq!(overlay.get(b"a").unwrap(), Some(b"backend".to_vec()));

        overlay.put(b"a".to_vec(), b"layered".to_vec());
        assert_eq!(overlay.get(b"a").unwrap(), Some(b"layered".to_vec()));

        overlay.delete(b"a".to_vec());
        assert_eq!(overlay.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_overlay_iter_merges() {
        let mut overlay = overlay_over(&[(b"p1", b"1"), (b"p2", b"2"), (b"q", b"x")]);
        overlay.put(b"p3".to_vec(), b"3".to_vec());
        overlay.delete(b"p1".to_vec());

        let hits = overlay.iter_prefix(b"p").unwrap();
        assert_eq!(
            hits,
            vec![
                (b"p2".to_vec(), b"2".to_vec()),
                (b"p3".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_overlay_error_flag_sticky() {
        let mut overlay = overlay_over(&[]);
        assert!(overlay.error().is_none());
        overlay.set_error(StorageError::Backend("first".into()));
        overlay.set_error(StorageError::Backend("second".into()));
        assert_eq!(
            overlay.error(),
            Some(&StorageError::Backend("first".into()))
        );
    }
}
