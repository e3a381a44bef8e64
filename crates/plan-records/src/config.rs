use plan_types::RetryPolicy;
use serde::{Deserialize, Serialize};

/// How a guarded write reaches the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// Fingerprint check and write are one atomic `compare_and_set` against
    /// the bytes that were read. Interleaved writers get `Conflict`.
    #[default]
    CompareAndSwap,
    /// Read, check, then unconditional `set`. Two concurrent writers can both
    /// pass the check and the last one wins.
    CheckThenSet,
}

/// Record manager settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub write_mode: WriteMode,
    /// Reject writes that reuse a nested `objectId` owned by another plan.
    pub enforce_unique_nested_ids: bool,
    /// Backoff for transient store and channel failures.
    pub retry: RetryPolicy,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::default(),
            enforce_unique_nested_ids: true,
            retry: RetryPolicy::default(),
        }
    }
}
