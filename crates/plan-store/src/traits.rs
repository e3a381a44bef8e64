use async_trait::async_trait;

use crate::error::StoreResult;

/// Result of a conditional write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The current value matched and the new value was written.
    Applied,
    /// The current value differed from the expectation; nothing was written.
    Mismatch,
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Keyed byte store holding serialized plan records.
///
/// All implementations must satisfy these invariants:
/// - The store never interprets values; it is a pure key-value store.
/// - `compare_and_set` is atomic with respect to every other call on the
///   same store: the comparison and the write observe no interleaving.
/// - All I/O errors are propagated, never silently ignored. Errors that may
///   succeed on retry are reported as `StoreError::Unavailable`.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Unconditionally write `value` under `key`.
    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Delete `key`. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Check whether `key` exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Every entry in the store, ordered by key.
    async fn scan_all(&self) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Atomically write `value` if the current value equals `expected`.
    ///
    /// `expected = None` means "only if the key is absent" (create).
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
    ) -> StoreResult<CasOutcome>;
}
