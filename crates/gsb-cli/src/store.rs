//! File-backed storage
//!
//! A [`MemoryStore`] whose committed state is written to a JSON file after
//! every commit, every write made outside a transaction and every write that
//! bypasses one (backoff state, confirmed full hashes).

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use gsb_core::chunk::Chunk;
use gsb_core::storage::{AddHit, CachedFullHash, StorageResult, StoreState};
use gsb_core::{ChunkKind, ChunkKinds, ChunkRange, HostKey, MemoryStore, SaveOutcome, Storage, StorageError};

pub struct JsonFileStore {
    path: PathBuf,
    memory: MemoryStore,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<StoreState>(&bytes)
                .map_err(|e| StorageError::Backend(format!("corrupt store {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(StorageError::Backend(format!("failed to read {}: {e}", path.display()))),
        };
        debug!("Opened store {} ({} chunks)", path.display(), state.chunks.len());
        Ok(Self {
            path,
            memory: MemoryStore::from_state(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the committed state.
    pub fn snapshot(&self) -> StorageResult<StoreState> {
        self.memory.snapshot()
    }

    fn persist(&self) -> StorageResult<()> {
        let state = self.memory.snapshot()?;
        let json = serde_json::to_vec(&state).map_err(|e| StorageError::Backend(e.to_string()))?;

        // replaced atomically
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| StorageError::Backend(format!("failed to write {}: {e}", self.path.display())))
    }

    fn persist_unless_pending(&self) -> StorageResult<()> {
        if self.memory.in_transaction()? {
            return Ok(());
        }
        self.persist()
    }
}

impl Storage for JsonFileStore {
    fn get_config(&self, key: &str) -> StorageResult<Option<String>> {
        self.memory.get_config(key)
    }

    fn set_config(&self, key: &str, value: &str) -> StorageResult<()> {
        self.memory.set_config(key, value)?;
        self.persist_unless_pending()
    }

    fn set_config_outside_transaction(&self, key: &str, value: &str) -> StorageResult<()> {
        self.memory.set_config_outside_transaction(key, value)?;
        self.persist()
    }

    fn start_transaction(&self) -> StorageResult<()> {
        self.memory.start_transaction()
    }

    fn commit(&self) -> StorageResult<()> {
        self.memory.commit()?;
        self.persist()
    }

    fn rollback(&self) -> StorageResult<()> {
        self.memory.rollback()
    }

    fn chunk_numbers(&self, list: &str, kind: ChunkKind) -> StorageResult<Vec<u32>> {
        self.memory.chunk_numbers(list, kind)
    }

    fn delete_ranges(&self, list: &str, kind: ChunkKind, ranges: &[ChunkRange]) -> StorageResult<()> {
        self.memory.delete_ranges(list, kind, ranges)?;
        self.persist_unless_pending()
    }

    fn save_chunk(&self, chunk: &Chunk) -> StorageResult<SaveOutcome> {
        let outcome = self.memory.save_chunk(chunk)?;
        self.persist_unless_pending()?;
        Ok(outcome)
    }

    fn reset_lists(&self, lists: &[String], kinds: ChunkKinds) -> StorageResult<()> {
        self.memory.reset_lists(lists, kinds)?;
        self.persist_unless_pending()
    }

    fn add_hits(&self, list: &str, host_key: HostKey) -> StorageResult<Vec<AddHit>> {
        self.memory.add_hits(list, host_key)
    }

    fn host_cancelled(&self, list: &str, host_key: HostKey, add_chunk: u32) -> StorageResult<bool> {
        self.memory.host_cancelled(list, host_key, add_chunk)
    }

    fn prefix_cancelled(&self, list: &str, host_key: HostKey, add_chunk: u32, prefix: &[u8]) -> StorageResult<bool> {
        self.memory.prefix_cancelled(list, host_key, add_chunk, prefix)
    }

    fn cached_full_hashes(&self, list: &str, add_chunk: u32, prefix: &[u8]) -> StorageResult<Vec<CachedFullHash>> {
        self.memory.cached_full_hashes(list, add_chunk, prefix)
    }

    fn cache_full_hash(&self, entry: &CachedFullHash) -> StorageResult<()> {
        self.memory.cache_full_hash(entry)?;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsb_core::chunk::ChunkEntry;

    fn chunk(number: u32) -> Chunk {
        Chunk {
            list: "goog-malware-shavar".to_string(),
            kind: ChunkKind::Add,
            number,
            hash_len: 4,
            byte_length: 0,
            entries: vec![ChunkEntry::add_host(HostKey([1, 2, 3, 4]))],
        }
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json")).unwrap();
        assert_eq!(store.snapshot().unwrap(), StoreState::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_commit_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.start_transaction().unwrap();
        store.save_chunk(&chunk(1)).unwrap();
        assert!(!path.exists());
        store.commit().unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.chunk_numbers("goog-malware-shavar", ChunkKind::Add).unwrap(), vec![1]);
    }

    #[test]
    fn test_rollback_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set_config("Timeout_data", "100").unwrap();
        store.start_transaction().unwrap();
        store.save_chunk(&chunk(2)).unwrap();
        store.rollback().unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get_config("Timeout_data").unwrap().as_deref(), Some("100"));
        assert!(reopened.chunk_numbers("goog-malware-shavar", ChunkKind::Add).unwrap().is_empty());
    }

    #[test]
    fn test_backoff_state_persisted_during_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.start_transaction().unwrap();
        store.save_chunk(&chunk(3)).unwrap();
        store.set_config_outside_transaction("BackoffCount_lookup", "1").unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get_config("BackoffCount_lookup").unwrap().as_deref(), Some("1"));
        assert!(reopened.chunk_numbers("goog-malware-shavar", ChunkKind::Add).unwrap().is_empty());

        store.rollback().unwrap();
        assert_eq!(store.get_config("BackoffCount_lookup").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(StorageError::Backend(_))));
    }
}
