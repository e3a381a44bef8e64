//! Foundation types for the plan store.
//!
//! Every other crate in the workspace depends on `plan-types`.
//!
//! # Key Types
//!
//! - [`Tree`] -- a plan document (`serde_json::Value`)
//! - [`Fingerprint`] -- BLAKE3 digest of a document's canonical encoding
//! - [`PlanRecord`] / [`RecordMetadata`] -- a stored plan with audit stamps
//! - [`ChangeEvent`] -- upsert/delete notification for downstream projections
//! - [`NestedPosition`] -- fixed schema positions of nested entities
//! - [`RetryPolicy`] -- bounded exponential backoff

pub mod document;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod record;
pub mod retry;

pub use document::{fields, nested_entities, object_id_of, NestedPosition, Tree, TreeMap};
pub use error::TypeError;
pub use event::ChangeEvent;
pub use fingerprint::Fingerprint;
pub use record::{PlanRecord, RecordMetadata};
pub use retry::RetryPolicy;
