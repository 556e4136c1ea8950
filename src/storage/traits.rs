//! Storage Trait Definitions
//!
//! Abstract epoch persistence. The directory is fully usable without a
//! store; when one is configured, each epoch cut saves a record the PAD can
//! resume from after a restart. Implementations can use SQLite (production)
//! or in-memory (testing).
//!
//! The interface is synchronous: saves happen under the directory write
//! lock during epoch cuts, and the SQLite driver is synchronous anyway.

use thiserror::Error;

use crate::pad::RestoredEpoch;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Epoch persistence interface
///
/// Implementations:
/// - `SqliteEpochStore` - Production storage with SQLite
/// - `MemoryEpochStore` - In-memory storage for testing
pub trait EpochStore: Send + Sync {
    /// Persist one committed epoch.
    fn save_epoch(&self, record: &RestoredEpoch) -> StorageResult<()>;

    /// The most recent persisted epoch, if any.
    fn load_latest(&self) -> StorageResult<Option<RestoredEpoch>>;

    /// Drop records for epochs below `epoch`; returns how many epochs went.
    fn prune_below(&self, epoch: u64) -> StorageResult<u64>;
}
