use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::traits::{CasOutcome, KeyedStore};

/// In-memory, `BTreeMap`-based keyed store.
///
/// Intended for tests and embedding. Entries live behind a `RwLock`; the
/// lock is only held for the duration of a single map operation, never across
/// an `.await`.
pub struct InMemoryKeyedStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryKeyedStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of all keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
        StoreError::Unavailable(format!("lock poisoned: {e}"))
    }
}

impl Default for InMemoryKeyedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyedStore for InMemoryKeyedStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let map = self.entries.read().map_err(Self::poisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let mut map = self.entries.write().map_err(Self::poisoned)?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut map = self.entries.write().map_err(Self::poisoned)?;
        Ok(map.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let map = self.entries.read().map_err(Self::poisoned)?;
        Ok(map.contains_key(key))
    }

    async fn scan_all(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let map = self.entries.read().map_err(Self::poisoned)?;
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
    ) -> StoreResult<CasOutcome> {
        let mut map = self.entries.write().map_err(Self::poisoned)?;
        if map.get(key).map(Vec::as_slice) != expected {
            return Ok(CasOutcome::Mismatch);
        }
        map.insert(key.to_string(), value);
        Ok(CasOutcome::Applied)
    }
}

impl std::fmt::Debug for InMemoryKeyedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKeyedStore")
            .field("key_count", &self.len())
            .finish()
    }
}
