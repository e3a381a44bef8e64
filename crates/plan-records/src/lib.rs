//! Optimistic-concurrency record manager for plan documents.
//!
//! [`RecordManager`] owns every stored plan. Each write is checked against
//! the caller's fingerprint, validated, persisted through a
//! [`KeyedStore`](plan_store::KeyedStore), and announced with exactly one
//! [`ChangeEvent`](plan_types::ChangeEvent) on the change channel.
//!
//! Deleting by an id that is not a plan falls through to nested-entity
//! removal: the entity is located anywhere in the corpus (reverse index
//! first, full scan as fallback) and its owning plan is re-saved.

pub mod config;
pub mod error;
pub mod manager;
pub mod nested;
mod retry;
mod stored;

pub use config::{RecordConfig, WriteMode};
pub use error::{RecordError, RecordResult};
pub use manager::{DeleteOutcome, Located, ReadOutcome, RecordManager};
pub use nested::{entity_ids, find_nested, remove_nested, NestedIndex};
