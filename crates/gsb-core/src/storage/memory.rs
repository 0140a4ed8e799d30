//! In-memory storage adapter
//!
//! Keeps the committed state and, while a transaction is open, a working
//! copy that update writes go to. Commit swaps the copy in. The whole state
//! is serde-serializable so file-backed adapters can persist it.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use super::{AddHit, CachedFullHash, SaveOutcome, Storage, StorageError, StorageResult};
use crate::chunk::Chunk;
use crate::ranges::ChunkRange;
use crate::types::{ChunkKind, ChunkKinds, HostKey};

/// Everything a store holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    pub config: BTreeMap<String, String>,
    pub chunks: Vec<Chunk>,
    pub full_hashes: Vec<CachedFullHash>,
}

impl StoreState {
    fn chunks_of<'a>(&'a self, list: &'a str, kind: ChunkKind) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.chunks.iter().filter(move |c| c.kind == kind && c.list == list)
    }

    fn drop_cached(&mut self, list: &str, mut add_chunk: impl FnMut(u32) -> bool) {
        self.full_hashes.retain(|h| !(h.list == list && add_chunk(h.add_chunk)));
    }
}

#[derive(Debug, Default)]
struct Inner {
    committed: StoreState,
    pending: Option<StoreState>,
}

impl Inner {
    fn working(&self) -> &StoreState {
        self.pending.as_ref().unwrap_or(&self.committed)
    }

    fn working_mut(&mut self) -> &mut StoreState {
        self.pending.as_mut().unwrap_or(&mut self.committed)
    }
}

/// Storage adapter held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            inner: RwLock::new(Inner {
                committed: state,
                pending: None,
            }),
        }
    }

    /// Copy of the committed state.
    pub fn snapshot(&self) -> StorageResult<StoreState> {
        Ok(self.read()?.committed.clone())
    }

    pub fn in_transaction(&self) -> StorageResult<bool> {
        Ok(self.read()?.pending.is_some())
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StorageError::Backend("store lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| StorageError::Backend("store lock poisoned".to_string()))
    }
}

impl Storage for MemoryStore {
    fn get_config(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.read()?.working().config.get(key).cloned())
    }

    fn set_config(&self, key: &str, value: &str) -> StorageResult<()> {
        self.write()?
            .working_mut()
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_config_outside_transaction(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut inner = self.write()?;
        let Inner { committed, pending } = &mut *inner;
        for state in std::iter::once(committed).chain(pending.as_mut()) {
            state.config.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn start_transaction(&self) -> StorageResult<()> {
        let mut inner = self.write()?;
        if inner.pending.is_some() {
            return Err(StorageError::TransactionActive);
        }
        inner.pending = Some(inner.committed.clone());
        Ok(())
    }

    fn commit(&self) -> StorageResult<()> {
        let mut inner = self.write()?;
        inner.committed = inner.pending.take().ok_or(StorageError::NoTransaction)?;
        Ok(())
    }

    fn rollback(&self) -> StorageResult<()> {
        self.write()?.pending.take().ok_or(StorageError::NoTransaction)?;
        Ok(())
    }

    fn chunk_numbers(&self, list: &str, kind: ChunkKind) -> StorageResult<Vec<u32>> {
        let inner = self.read()?;
        let mut numbers: Vec<u32> = inner.working().chunks_of(list, kind).map(|c| c.number).collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    fn delete_ranges(&self, list: &str, kind: ChunkKind, ranges: &[ChunkRange]) -> StorageResult<()> {
        let in_ranges = |n: u32| ranges.iter().any(|r| r.contains(n));
        let mut inner = self.write()?;
        let state = inner.working_mut();
        state
            .chunks
            .retain(|c| !(c.kind == kind && c.list == list && in_ranges(c.number)));
        if kind == ChunkKind::Add {
            state.drop_cached(list, in_ranges);
        }
        Ok(())
    }

    fn save_chunk(&self, chunk: &Chunk) -> StorageResult<SaveOutcome> {
        let mut inner = self.write()?;
        let state = inner.working_mut();
        if state
            .chunks_of(&chunk.list, chunk.kind)
            .any(|c| c.number == chunk.number)
        {
            return Ok(SaveOutcome::Duplicate);
        }
        state.chunks.push(chunk.clone());
        Ok(SaveOutcome::Saved)
    }

    fn reset_lists(&self, lists: &[String], kinds: ChunkKinds) -> StorageResult<()> {
        let mut inner = self.write()?;
        let state = inner.working_mut();
        state
            .chunks
            .retain(|c| !(kinds.includes(c.kind) && lists.contains(&c.list)));
        if kinds.contains(ChunkKinds::ADD) {
            for list in lists {
                state.drop_cached(list, |_| true);
            }
        }
        Ok(())
    }

    fn add_hits(&self, list: &str, host_key: HostKey) -> StorageResult<Vec<AddHit>> {
        let inner = self.read()?;
        let hits = inner
            .committed
            .chunks_of(list, ChunkKind::Add)
            .flat_map(|c| {
                c.entries
                    .iter()
                    .filter(move |e| e.host_key == host_key)
                    .map(move |e| AddHit {
                        add_chunk: c.number,
                        prefixes: e.prefixes.iter().map(|p| p.prefix.clone()).collect(),
                    })
            })
            .collect();
        Ok(hits)
    }

    fn host_cancelled(&self, list: &str, host_key: HostKey, add_chunk: u32) -> StorageResult<bool> {
        let inner = self.read()?;
        let cancelled = inner
            .committed
            .chunks_of(list, ChunkKind::Sub)
            .flat_map(|c| c.entries.iter())
            .any(|e| e.host_key == host_key && e.is_host_level() && e.add_chunk == Some(add_chunk));
        Ok(cancelled)
    }

    fn prefix_cancelled(&self, list: &str, host_key: HostKey, add_chunk: u32, prefix: &[u8]) -> StorageResult<bool> {
        let inner = self.read()?;
        let cancelled = inner
            .committed
            .chunks_of(list, ChunkKind::Sub)
            .flat_map(|c| c.entries.iter())
            .filter(|e| e.host_key == host_key)
            .flat_map(|e| e.prefixes.iter())
            .any(|p| p.add_chunk == Some(add_chunk) && p.prefix == prefix);
        Ok(cancelled)
    }

    fn cached_full_hashes(&self, list: &str, add_chunk: u32, prefix: &[u8]) -> StorageResult<Vec<CachedFullHash>> {
        let inner = self.read()?;
        Ok(inner
            .committed
            .full_hashes
            .iter()
            .filter(|h| h.list == list && h.add_chunk == add_chunk && h.full_hash.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn cache_full_hash(&self, entry: &CachedFullHash) -> StorageResult<()> {
        let mut inner = self.write()?;
        let Inner { committed, pending } = &mut *inner;
        for state in std::iter::once(committed).chain(pending.as_mut()) {
            state.full_hashes.retain(|h| {
                !(h.list == entry.list && h.add_chunk == entry.add_chunk && h.full_hash == entry.full_hash)
            });
            state.full_hashes.push(entry.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkEntry, PrefixEntry};

    const HK: HostKey = HostKey([1, 2, 3, 4]);

    fn chunk(kind: ChunkKind, number: u32, entries: Vec<ChunkEntry>) -> Chunk {
        Chunk {
            list: "test-shavar".to_string(),
            kind,
            number,
            hash_len: 4,
            byte_length: 0,
            entries,
        }
    }

    fn cached(add_chunk: u32) -> CachedFullHash {
        CachedFullHash {
            list: "test-shavar".to_string(),
            add_chunk,
            full_hash: [9; 32],
            cached_at: 100,
        }
    }

    #[test]
    fn test_lookups_see_only_committed_data() {
        let store = MemoryStore::new();
        store.start_transaction().unwrap();
        store.save_chunk(&chunk(ChunkKind::Add, 1, vec![ChunkEntry::add_host(HK)])).unwrap();

        assert!(store.add_hits("test-shavar", HK).unwrap().is_empty());
        assert_eq!(store.chunk_numbers("test-shavar", ChunkKind::Add).unwrap(), vec![1]);

        store.commit().unwrap();
        let hits = store.add_hits("test-shavar", HK).unwrap();
        assert_eq!(hits, vec![AddHit { add_chunk: 1, prefixes: vec![] }]);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        store.set_config("Timeout_data", "5").unwrap();
        store.start_transaction().unwrap();
        store.save_chunk(&chunk(ChunkKind::Add, 1, vec![])).unwrap();
        store.set_config("Timeout_data", "99").unwrap();
        store.rollback().unwrap();

        assert!(store.chunk_numbers("test-shavar", ChunkKind::Add).unwrap().is_empty());
        assert_eq!(store.get_config("Timeout_data").unwrap().as_deref(), Some("5"));
        assert!(!store.in_transaction().unwrap());
    }

    #[test]
    fn test_transaction_misuse() {
        let store = MemoryStore::new();
        assert_eq!(store.commit(), Err(StorageError::NoTransaction));
        assert_eq!(store.rollback(), Err(StorageError::NoTransaction));
        store.start_transaction().unwrap();
        assert_eq!(store.start_transaction(), Err(StorageError::TransactionActive));
    }

    #[test]
    fn test_duplicate_chunk() {
        let store = MemoryStore::new();
        let c = chunk(ChunkKind::Add, 4, vec![]);
        assert_eq!(store.save_chunk(&c).unwrap(), SaveOutcome::Saved);
        assert_eq!(store.save_chunk(&c).unwrap(), SaveOutcome::Duplicate);
        // same number, other kind
        assert_eq!(store.save_chunk(&chunk(ChunkKind::Sub, 4, vec![])).unwrap(), SaveOutcome::Saved);
    }

    #[test]
    fn test_cancellation_queries() {
        let store = MemoryStore::new();
        store
            .save_chunk(&chunk(
                ChunkKind::Sub,
                10,
                vec![
                    ChunkEntry::sub_host(HK, 5),
                    ChunkEntry::with_prefixes(HK, vec![PrefixEntry::sub(6, vec![7, 7, 7, 7])]),
                ],
            ))
            .unwrap();

        assert!(store.host_cancelled("test-shavar", HK, 5).unwrap());
        assert!(!store.host_cancelled("test-shavar", HK, 6).unwrap());
        assert!(!store.host_cancelled("other-shavar", HK, 5).unwrap());
        assert!(store.prefix_cancelled("test-shavar", HK, 6, &[7, 7, 7, 7]).unwrap());
        assert!(!store.prefix_cancelled("test-shavar", HK, 5, &[7, 7, 7, 7]).unwrap());
        assert!(!store.prefix_cancelled("test-shavar", HostKey([0; 4]), 6, &[7, 7, 7, 7]).unwrap());
    }

    #[test]
    fn test_delete_ranges_drops_cached_hashes() {
        let store = MemoryStore::new();
        for n in 1..=5 {
            store.save_chunk(&chunk(ChunkKind::Add, n, vec![])).unwrap();
        }
        store.cache_full_hash(&cached(2)).unwrap();
        store.cache_full_hash(&cached(5)).unwrap();

        store
            .delete_ranges("test-shavar", ChunkKind::Add, &[ChunkRange::new(1, 2), ChunkRange::single(4)])
            .unwrap();
        assert_eq!(store.chunk_numbers("test-shavar", ChunkKind::Add).unwrap(), vec![3, 5]);
        assert!(store.cached_full_hashes("test-shavar", 2, &[9]).unwrap().is_empty());
        assert_eq!(store.cached_full_hashes("test-shavar", 5, &[9, 9]).unwrap().len(), 1);
    }

    #[test]
    fn test_reset_lists() {
        let store = MemoryStore::new();
        store.save_chunk(&chunk(ChunkKind::Add, 1, vec![])).unwrap();
        store.save_chunk(&chunk(ChunkKind::Sub, 2, vec![])).unwrap();
        store.cache_full_hash(&cached(1)).unwrap();

        store.reset_lists(&["test-shavar".to_string()], ChunkKinds::ALL).unwrap();
        assert!(store.snapshot().unwrap().chunks.is_empty());
        assert!(store.snapshot().unwrap().full_hashes.is_empty());
    }

    #[test]
    fn test_cache_survives_commit_of_open_transaction() {
        let store = MemoryStore::new();
        store.start_transaction().unwrap();
        store.cache_full_hash(&cached(3)).unwrap();
        assert_eq!(store.cached_full_hashes("test-shavar", 3, &[]).unwrap().len(), 1);
        store.commit().unwrap();
        assert_eq!(store.cached_full_hashes("test-shavar", 3, &[]).unwrap().len(), 1);

        let mut refreshed = cached(3);
        refreshed.cached_at = 200;
        store.cache_full_hash(&refreshed).unwrap();
        assert_eq!(store.cached_full_hashes("test-shavar", 3, &[]).unwrap(), vec![refreshed]);
    }

    #[test]
    fn test_config_outside_transaction_survives_rollback() {
        let store = MemoryStore::new();
        store.start_transaction().unwrap();
        store.set_config("ClientMAC", "abc").unwrap();
        store.set_config_outside_transaction("BackoffCount_lookup", "2").unwrap();
        assert_eq!(store.get_config("BackoffCount_lookup").unwrap().as_deref(), Some("2"));
        store.rollback().unwrap();

        assert_eq!(store.get_config("ClientMAC").unwrap(), None);
        assert_eq!(store.get_config("BackoffCount_lookup").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_state_serializes() {
        let store = MemoryStore::new();
        store.set_config("ClientMAC", "abc").unwrap();
        store
            .save_chunk(&chunk(ChunkKind::Add, 1, vec![ChunkEntry::add_host(HK)]))
            .unwrap();
        let json = serde_json::to_string(&store.snapshot().unwrap()).unwrap();
        let restored: StoreState = serde_json::from_str(&json).unwrap();
        assert_eq!(MemoryStore::from_state(restored).snapshot().unwrap(), store.snapshot().unwrap());
    }
}
