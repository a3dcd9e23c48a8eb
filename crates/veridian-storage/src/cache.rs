//! Transaction-scoped write buffer over the overlay.
//!
//! `CacheDb` is the only state view engines touch during execution. Keys are
//! byte strings; contract-owned storage keys are `address(20) ‖ user_key`.
//! Two keyspaces share the buffer, distinguished by a leading byte the
//! callers never see: contract records (the serialized `DeployCode`) and
//! contract storage.
//!
//! Clones share the pending buffer, so the dispatcher and the services it
//! spawns observe one transaction-level view. `commit` flushes into the
//! overlay; dropping the last clone discards everything pending.

use crate::error::StorageError;
use crate::overlay::SharedOverlay;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use veridian_types::{Address, DeployCode};

const KEYSPACE_CONTRACT: u8 = 0x01;
const KEYSPACE_STORAGE: u8 = 0x05;

fn frame(space: u8, key: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(1 + key.len());
    framed.push(space);
    framed.extend_from_slice(key);
    framed
}

#[derive(Clone)]
pub struct CacheDb {
    overlay: SharedOverlay,
    pending: Arc<RwLock<BTreeMap<Vec<u8>, Option<Vec<u8>>>>>,
}

impl CacheDb {
    /// Open an independent write buffer over the overlay.
    pub fn new(overlay: SharedOverlay) -> Self {
        Self {
            overlay,
            pending: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn overlay(&self) -> &SharedOverlay {
        &self.overlay
    }

    /// Open an independent buffer over the same overlay. Unlike `clone`,
    /// the child does not see this cache's pending writes.
    pub fn new_child(&self) -> Self {
        Self::new(self.overlay.clone())
    }

    fn get_framed(&self, framed: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(entry) = self.pending.read().get(framed) {
            return Ok(entry.clone());
        }
        self.overlay.read().get(framed)
    }

    /// Read a contract-storage value. `key` is `address(20) ‖ user_key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.get_framed(&frame(KEYSPACE_STORAGE, key))
    }

    pub fn put(&self, key: &[u8], value: Vec<u8>) {
        self.pending
            .write()
            .insert(frame(KEYSPACE_STORAGE, key), Some(value));
    }

    pub fn delete(&self, key: &[u8]) {
        self.pending.write().insert(frame(KEYSPACE_STORAGE, key), None);
    }

    pub fn get_contract(&self, address: &Address) -> Result<Option<DeployCode>, StorageError> {
        match self.get_framed(&frame(KEYSPACE_CONTRACT, address.as_bytes()))? {
            Some(raw) => Ok(Some(DeployCode::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_contract(&self, code: &DeployCode) {
        let key = frame(KEYSPACE_CONTRACT, code.address().as_bytes());
        self.pending.write().insert(key, Some(code.to_bytes()));
    }

    pub fn delete_contract(&self, address: &Address) {
        let key = frame(KEYSPACE_CONTRACT, address.as_bytes());
        self.pending.write().insert(key, None);
    }

    /// Ordered iterator over the live merged view of contract storage under
    /// `prefix` (pending writes layered over the overlay).
    ///
    /// The iterator is a stable snapshot: writes issued while iterating are
    /// not observed by it. Keys come back unframed (`address ‖ user_key`).
    pub fn iter(&self, prefix: &[u8]) -> Result<CacheIter, StorageError> {
        let framed_prefix = frame(KEYSPACE_STORAGE, prefix);
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .overlay
            .read()
            .iter_prefix(&framed_prefix)?
            .into_iter()
            .collect();
        {
            let pending = self.pending.read();
            for (k, v) in pending
                .range(framed_prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&framed_prefix))
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
        }
        let entries: Vec<(Vec<u8>, Vec<u8>)> = merged
            .into_iter()
            .map(|(k, v)| (k[1..].to_vec(), v))
            .collect();
        Ok(CacheIter {
            entries: entries.into_iter(),
        })
    }

    /// Flush all pending writes into the overlay. The buffer is left empty
    /// and can keep serving the same transaction.
    pub fn commit(&self) {
        let mut pending = self.pending.write();
        let mut overlay = self.overlay.write();
        for (key, value) in std::mem::take(&mut *pending) {
            match value {
                Some(v) => overlay.put(key, v),
                None => overlay.delete(key),
            }
        }
    }

    /// Number of pending writes (including tombstones).
    pub fn pending(&self) -> usize {
        self.pending.read().len()
    }
}

/// Snapshot iterator over contract storage, ascending by key.
pub struct CacheIter {
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for CacheIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemLedger;
    use crate::overlay::OverlayDB;
    use veridian_types::VmType;

    fn fresh_overlay() -> SharedOverlay {
        OverlayDB::shared(Arc::new(MemLedger::new()))
    }

    fn storage_key(addr: &Address, user: &[u8]) -> Vec<u8> {
        let mut key = addr.as_bytes().to_vec();
        key.extend_from_slice(user);
        key
    }

    #[test]
    fn test_cache_get_put_delete() {
        let cache = CacheDb::new(fresh_overlay());
        let addr = Address::from_bytes([1u8; 20]);
        let key = storage_key(&addr, b"k");

        assert_eq!(cache.get(&key).unwrap(), None);
        cache.put(&key, b"v".to_vec());
        assert_eq!(cache.get(&key).unwrap(), Some(b"v".to_vec()));
        cache.delete(&key);
        assert_eq!(cache.get(&key).unwrap(), None);
    }

    #[test]
    fn test_cache_commit_then_fresh_cache_sees_it() {
        let overlay = fresh_overlay();
        let addr = Address::from_bytes([2u8; 20]);
        let key = storage_key(&addr, b"x");

        let cache = CacheDb::new(overlay.clone());
        cache.put(&key, b"1".to_vec());
        cache.commit();
        assert_eq!(cache.pending(), 0);

        let other = CacheDb::new(overlay);
        assert_eq!(other.get(&key).unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_cache_discard_drops_pending() {
        let overlay = fresh_overlay();
        let addr = Address::from_bytes([3u8; 20]);
        let key = storage_key(&addr, b"x");

        {
            let cache = CacheDb::new(overlay.clone());
            cache.put(&key, b"1".to_vec());
            // dropped without commit
        }
        let other = CacheDb::new(overlay);
        assert_eq!(other.get(&key).unwrap(), None);
    }

    #[test]
    fn test_new_child_is_independent() {
        let cache = CacheDb::new(fresh_overlay());
        let addr = Address::from_bytes([9u8; 20]);
        let key = storage_key(&addr, b"x");

        cache.put(&key, b"pending".to_vec());
        let child = cache.new_child();
        assert_eq!(child.get(&key).unwrap(), None);

        cache.commit();
        assert_eq!(child.get(&key).unwrap(), Some(b"pending".to_vec()));
    }

    #[test]
    fn test_cache_clone_shares_buffer() {
        let cache = CacheDb::new(fresh_overlay());
        let addr = Address::from_bytes([4u8; 20]);
        let key = storage_key(&addr, b"x");

        let clone = cache.clone();
        clone.put(&key, b"1".to_vec());
        assert_eq!(cache.get(&key).unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_contract_records() {
        let cache = CacheDb::new(fresh_overlay());
        let dc = DeployCode::new(vec![1, 2, 3], VmType::Stack, "t", "1", "a", "e", "d")
            .unwrap();
        let addr = dc.address();

        assert_eq!(cache.get_contract(&addr).unwrap(), None);
        cache.put_contract(&dc);
        assert_eq!(cache.get_contract(&addr).unwrap(), Some(dc));
        cache.delete_contract(&addr);
        assert_eq!(cache.get_contract(&addr).unwrap(), None);
    }

    #[test]
    fn test_contract_records_do_not_collide_with_storage() {
        let cache = CacheDb::new(fresh_overlay());
        let dc = DeployCode::new(vec![1, 2, 3], VmType::Stack, "t", "1", "a", "e", "d")
            .unwrap();
        cache.put_contract(&dc);

        // a storage key equal to the contract address bytes lives in a
        // different keyspace
        assert_eq!(cache.get(dc.address().as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_iter_merges_overlay_and_pending() {
        let overlay = fresh_overlay();
        let addr = Address::from_bytes([5u8; 20]);

        let seed = CacheDb::new(overlay.clone());
        seed.put(&storage_key(&addr, b"a"), b"old".to_vec());
        seed.put(&storage_key(&addr, b"b"), b"keep".to_vec());
        seed.commit();

        let cache = CacheDb::new(overlay);
        cache.put(&storage_key(&addr, b"a"), b"new".to_vec());
        cache.put(&storage_key(&addr, b"c"), b"add".to_vec());
        cache.delete(&storage_key(&addr, b"b"));

        let hits: Vec<_> = cache.iter(addr.as_bytes()).unwrap().collect();
        assert_eq!(
            hits,
            vec![
                (storage_key(&addr, b"a"), b"new".to_vec()),
                (storage_key(&addr, b"c"), b"add".to_vec()),
            ]
        );
    }

    #[test]
    fn test_iter_is_snapshot() {
        let cache = CacheDb::new(fresh_overlay());
        let addr = Address::from_bytes([6u8; 20]);
        cache.put(&storage_key(&addr, b"a"), b"1".to_vec());

        let iter = cache.iter(addr.as_bytes()).unwrap();
        cache.put(&storage_key(&addr, b"b"), b"2".to_vec());
        let hits: Vec<_> = iter.collect();
        assert_eq!(hits.len(), 1);
    }
}
