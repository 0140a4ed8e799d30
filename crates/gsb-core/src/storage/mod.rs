//! Storage contract
//!
//! The update orchestrator writes chunks through this trait and the matching
//! engine queries it. Adapters decide how data is laid out; the contract
//! fixes only the semantics:
//!
//! - Writes made between `start_transaction` and `commit` become visible to
//!   lookup queries atomically on commit and vanish on `rollback`.
//! - Lookup queries (`add_hits`, the cancel checks and the full-hash cache)
//!   only ever observe committed data.
//! - `save_chunk` reports an already stored `(list, kind, number)` as
//!   [`SaveOutcome::Duplicate`] rather than failing.
//! - `set_config` writes commit and roll back with an open transaction;
//!   `set_config_outside_transaction` and `cache_full_hash` writes do not.

pub mod memory;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::ranges::{ChunkRange, ListRangeSet};
use crate::types::{ChunkKind, ChunkKinds, FullHash, HostKey};

pub use memory::{MemoryStore, StoreState};

pub type StorageResult<T> = Result<T, StorageError>;

/// Error type for storage adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Transient; the operation may be retried once.
    #[error("Storage connection lost: {0}")]
    ConnectionLost(String),
    #[error("No transaction in progress")]
    NoTransaction,
    #[error("A transaction is already in progress")]
    TransactionActive,
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result of saving a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The chunk number was already stored for this list and kind
    Duplicate,
}

/// An add entry found under a host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddHit {
    pub add_chunk: u32,
    /// Empty for a host-level entry
    pub prefixes: Vec<Vec<u8>>,
}

/// A full hash confirmed by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFullHash {
    pub list: String,
    pub add_chunk: u32,
    pub full_hash: FullHash,
    /// Unix time of the confirmation
    pub cached_at: u64,
}

/// Persistence used by the updater and the matcher.
pub trait Storage: Send + Sync {
    fn get_config(&self, key: &str) -> StorageResult<Option<String>>;
    fn set_config(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Write a config value that survives the rollback of an open transaction.
    fn set_config_outside_transaction(&self, key: &str, value: &str) -> StorageResult<()>;

    fn start_transaction(&self) -> StorageResult<()>;
    fn commit(&self) -> StorageResult<()>;
    fn rollback(&self) -> StorageResult<()>;

    /// Stored chunk numbers for a list and kind, ascending.
    fn chunk_numbers(&self, list: &str, kind: ChunkKind) -> StorageResult<Vec<u32>>;

    /// Compressed ranges for each requested list and kind, in request order.
    fn list_ranges(&self, lists: &[String], kinds: ChunkKinds) -> StorageResult<Vec<ListRangeSet>> {
        let mut out = Vec::new();
        for list in lists {
            for kind in [ChunkKind::Add, ChunkKind::Sub] {
                if kinds.includes(kind) {
                    let numbers = self.chunk_numbers(list, kind)?;
                    out.push(ListRangeSet::from_numbers(list.as_str(), kind, &numbers));
                }
            }
        }
        Ok(out)
    }

    /// Delete chunks (and, for add chunks, their cached full hashes).
    fn delete_ranges(&self, list: &str, kind: ChunkKind, ranges: &[ChunkRange]) -> StorageResult<()>;

    fn save_chunk(&self, chunk: &Chunk) -> StorageResult<SaveOutcome>;

    /// Drop every chunk and cached full hash of the given lists.
    fn reset_lists(&self, lists: &[String], kinds: ChunkKinds) -> StorageResult<()>;

    /// Committed add entries filed under a host key.
    fn add_hits(&self, list: &str, host_key: HostKey) -> StorageResult<Vec<AddHit>>;

    /// A host-level sub entry cancels the host-level add of `add_chunk`.
    fn host_cancelled(&self, list: &str, host_key: HostKey, add_chunk: u32) -> StorageResult<bool>;

    /// A sub entry cancels `prefix` as added by `add_chunk` under `host_key`.
    fn prefix_cancelled(&self, list: &str, host_key: HostKey, add_chunk: u32, prefix: &[u8]) -> StorageResult<bool>;

    /// Cached full hashes from `add_chunk` that start with `prefix`.
    fn cached_full_hashes(&self, list: &str, add_chunk: u32, prefix: &[u8]) -> StorageResult<Vec<CachedFullHash>>;

    /// Record a confirmation. Not part of any update transaction.
    fn cache_full_hash(&self, entry: &CachedFullHash) -> StorageResult<()>;
}

/// Run a storage operation, retrying once if the connection was lost.
pub fn retry_once<T>(what: &str, mut op: impl FnMut() -> StorageResult<T>) -> StorageResult<T> {
    match op() {
        Err(StorageError::ConnectionLost(reason)) => {
            warn!("Storage connection lost during {what} ({reason}), retrying");
            op()
        }
        other => other,
    }
}
