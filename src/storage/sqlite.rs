//! SQLite Persistent Storage
//!
//! Durable epoch storage that survives service restarts. Records live in a
//! single key-value table whose keys are a one-byte domain tag followed by
//! the big-endian epoch, so lexicographic key order is epoch order:
//!
//! - `0x01 || u64_be(epoch)` → the STR record
//! - `0x02 || u64_be(epoch)` → the tree record (nonce + salted leaves)
//! - `0x03 || u64_be(epoch)` → the policy record
//!
//! Values are JSON with binary fields hex-encoded.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::pad::{RestoredEpoch, RestoredLeaf};

use super::traits::{EpochStore, StorageError, StorageResult};

const TAG_STR: u8 = 0x01;
const TAG_TREE: u8 = 0x02;
const TAG_POLICIES: u8 = 0x03;

fn epoch_key(tag: u8, epoch: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = tag;
    key[1..].copy_from_slice(&epoch.to_be_bytes());
    key
}

#[derive(Serialize, Deserialize)]
struct StrRecord {
    epoch: u64,
    previous_epoch: u64,
    previous_str_hash: String,
    tree_hash: String,
    signature: String,
}

#[derive(Serialize, Deserialize)]
struct LeafRecord {
    index: String,
    key: String,
    payload: String,
    salt: String,
}

#[derive(Serialize, Deserialize)]
struct TreeRecord {
    tree_nonce: String,
    leaves: Vec<LeafRecord>,
}

#[derive(Serialize, Deserialize)]
struct PoliciesRecord {
    hash_id: String,
    vrf_public: String,
}

/// SQLite-backed epoch store
pub struct SqliteEpochStore {
    conn: Mutex<Connection>,
}

impl SqliteEpochStore {
    /// Create a store at the given database path, creating the file and
    /// schema as needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn =
            Connection::open(db_path).map_err(|e| StorageError::Connection(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StorageError::Connection(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn get_value(conn: &Connection, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }
}

impl EpochStore for SqliteEpochStore {
    fn save_epoch(&self, record: &RestoredEpoch) -> StorageResult<()> {
        let str_record = serde_json::to_vec(&StrRecord {
            epoch: record.epoch,
            previous_epoch: record.previous_epoch,
            previous_str_hash: hex::encode(record.previous_str_hash),
            tree_hash: hex::encode(record.tree_hash),
            signature: hex::encode(record.signature),
        })
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let tree_record = serde_json::to_vec(&TreeRecord {
            tree_nonce: hex::encode(record.tree_nonce),
            leaves: record
                .leaves
                .iter()
                .map(|leaf| LeafRecord {
                    index: hex::encode(leaf.index),
                    key: leaf.key.clone(),
                    payload: hex::encode(&leaf.payload),
                    salt: hex::encode(leaf.salt),
                })
                .collect(),
        })
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let policies_record = serde_json::to_vec(&PoliciesRecord {
            hash_id: record.hash_id.clone(),
            vrf_public: hex::encode(record.vrf_public),
        })
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        for (tag, value) in [
            (TAG_STR, &str_record),
            (TAG_TREE, &tree_record),
            (TAG_POLICIES, &policies_record),
        ] {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![epoch_key(tag, record.epoch).as_slice(), value],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        }
        tx.commit().map_err(|e| StorageError::Database(e.to_string()))
    }

    fn load_latest(&self) -> StorageResult<Option<RestoredEpoch>> {
        let conn = self.lock()?;

        // Big-endian epochs make the highest key the latest epoch.
        let latest_key: Option<Vec<u8>> = conn
            .query_row(
                "SELECT key FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key DESC LIMIT 1",
                params![
                    epoch_key(TAG_STR, 0).as_slice(),
                    epoch_key(TAG_STR + 1, 0).as_slice()
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let Some(latest_key) = latest_key else {
            return Ok(None);
        };
        let epoch_bytes: [u8; 8] = latest_key[1..]
            .try_into()
            .map_err(|_| StorageError::InvalidData("malformed epoch key".into()))?;
        let epoch = u64::from_be_bytes(epoch_bytes);

        let str_value = Self::get_value(&conn, &epoch_key(TAG_STR, epoch))?
            .ok_or_else(|| StorageError::NotFound(format!("STR record for epoch {epoch}")))?;
        let tree_value = Self::get_value(&conn, &epoch_key(TAG_TREE, epoch))?
            .ok_or_else(|| StorageError::NotFound(format!("tree record for epoch {epoch}")))?;
        let policies_value = Self::get_value(&conn, &epoch_key(TAG_POLICIES, epoch))?
            .ok_or_else(|| StorageError::NotFound(format!("policy record for epoch {epoch}")))?;

        let str_record: StrRecord = serde_json::from_slice(&str_value)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let tree_record: TreeRecord = serde_json::from_slice(&tree_value)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let policies_record: PoliciesRecord = serde_json::from_slice(&policies_value)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let mut leaves = Vec::with_capacity(tree_record.leaves.len());
        for leaf in &tree_record.leaves {
            leaves.push(RestoredLeaf {
                index: decode_array(&leaf.index)?,
                key: leaf.key.clone(),
                payload: decode_bytes(&leaf.payload)?,
                salt: decode_array(&leaf.salt)?,
            });
        }

        Ok(Some(RestoredEpoch {
            epoch: str_record.epoch,
            previous_epoch: str_record.previous_epoch,
            previous_str_hash: decode_array(&str_record.previous_str_hash)?,
            tree_hash: decode_array(&str_record.tree_hash)?,
            signature: decode_array(&str_record.signature)?,
            tree_nonce: decode_array(&tree_record.tree_nonce)?,
            leaves,
            hash_id: policies_record.hash_id,
            vrf_public: decode_array(&policies_record.vrf_public)?,
        }))
    }

    fn prune_below(&self, epoch: u64) -> StorageResult<u64> {
        let conn = self.lock()?;
        let mut pruned = 0u64;
        for tag in [TAG_STR, TAG_TREE, TAG_POLICIES] {
            let deleted = conn
                .execute(
                    "DELETE FROM kv WHERE key >= ?1 AND key < ?2",
                    params![
                        epoch_key(tag, 0).as_slice(),
                        epoch_key(tag, epoch).as_slice()
                    ],
                )
                .map_err(|e| StorageError::Database(e.to_string()))?;
            if tag == TAG_STR {
                pruned = deleted as u64;
            }
        }
        Ok(pruned)
    }
}

fn decode_array<const N: usize>(field: &str) -> StorageResult<[u8; N]> {
    let bytes = hex::decode(field).map_err(|e| StorageError::InvalidData(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| StorageError::InvalidData(format!("expected {N} bytes, got {}", bytes.len())))
}

fn decode_bytes(field: &str) -> StorageResult<Vec<u8>> {
    hex::decode(field).map_err(|e| StorageError::InvalidData(e.to_string()))
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
            leaves: vec![RestoredLeaf {
                index: [6u8; 32],
                key: "alice".into(),
                payload: b"key material".to_vec(),
                salt: [7u8; 32],
            }],
            hash_id: "sha3-256".into(),
            vrf_public: [5u8; 32],
        }
    }

    #[test]
    fn test_round_trip() {
        let store = SqliteEpochStore::in_memory().unwrap();
        assert!(store.load_latest().unwrap().is_none());

        store.save_epoch(&record(7)).unwrap();
        let loaded = store.load_latest().unwrap().unwrap();
        assert_eq!(loaded.epoch, 7);
        assert_eq!(loaded.tree_nonce, [4u8; 32]);
        assert_eq!(loaded.leaves.len(), 1);
        assert_eq!(loaded.leaves[0].key, "alice");
        assert_eq!(loaded.leaves[0].payload, b"key material");
        assert_eq!(loaded.hash_id, "sha3-256");
    }

    #[test]
    fn test_latest_wins() {
        let store = SqliteEpochStore::in_memory().unwrap();
        store.save_epoch(&record(1)).unwrap();
        store.save_epoch(&record(300)).unwrap();
        store.save_epoch(&record(2)).unwrap();
        assert_eq!(store.load_latest().unwrap().unwrap().epoch, 300);
    }

    #[test]
    fn test_prune_below() {
        let store = SqliteEpochStore::in_memory().unwrap();
        for epoch in 0..6 {
            store.save_epoch(&record(epoch)).unwrap();
        }
        assert_eq!(store.prune_below(4).unwrap(), 4);
        assert_eq!(store.load_latest().unwrap().unwrap().epoch, 5);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epochs.db");
        {
            let store = SqliteEpochStore::new(&path).unwrap();
            store.save_epoch(&record(9)).unwrap();
        }
        let store = SqliteEpochStore::new(&path).unwrap();
        assert_eq!(store.load_latest().unwrap().unwrap().epoch, 9);
    }
}
