//! In-Memory Storage Implementation
//!
//! Epoch records held in a mutex-guarded map. Data is lost when the service
//! restarts; intended for tests and development.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::pad::RestoredEpoch;

use super::traits::{EpochStore, StorageError, StorageResult};

/// In-memory epoch store
#[derive(Default)]
pub struct MemoryEpochStore {
    epochs: Mutex<BTreeMap<u64, RestoredEpoch>>,
}

impl MemoryEpochStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EpochStore for MemoryEpochStore {
    fn save_epoch(&self, record: &RestoredEpoch) -> StorageResult<()> {
        let mut epochs = self
            .epochs
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        epochs.insert(record.epoch, record.clone());
        Ok(())
    }

    fn load_latest(&self) -> StorageResult<Option<RestoredEpoch>> {
        let epochs = self
            .epochs
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(epochs.values().next_back().cloned())
    }

    fn prune_below(&self, epoch: u64) -> StorageResult<u64> {
        let mut epochs = self
            .epochs
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let keep = epochs.split_off(&epoch);
        let pruned = epochs.len() as u64;
        *epochs = keep;
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: u64) -> RestoredEpoch {
        RestoredEpoch {
            epoch,
            previous_epoch: epoch.saturating_sub(1),
            previous_str_hash: [1u8; 32],
            tree_hash: [2u8; 32],
            signature: [3u8; 64],
            tree_nonce: [4u8; 32],
            leaves: Vec::new(),
            hash_id: "sha3-256".into(),
            vrf_public: [5u8; 32],
        }
    }

    #[test]
    fn test_save_and_load_latest() {
        let store = MemoryEpochStore::new();
        assert!(store.load_latest().unwrap().is_none());

        store.save_epoch(&record(1)).unwrap();
        store.save_epoch(&record(3)).unwrap();
        store.save_epoch(&record(2)).unwrap();
        assert_eq!(store.load_latest().unwrap().unwrap().epoch, 3);
    }

    #[test]
    fn test_prune_below() {
        let store = MemoryEpochStore::new();
        for epoch in 0..5 {
            store.save_epoch(&record(epoch)).unwrap();
        }
        assert_eq!(store.prune_below(3).unwrap(), 3);
        assert_eq!(store.load_latest().unwrap().unwrap().epoch, 4);
    }
}
