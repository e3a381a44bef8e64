//! Plan store service.
//!
//! [`PlanService`] wires the record manager, the change channel, projection
//! workers, and the dead-letter recorder into one handle configured by a
//! [`PlanConfig`]. This is the main entry point for applications embedding
//! the plan store.

pub mod config;
pub mod error;
pub mod service;

pub use config::{DeadLetterConfig, PlanConfig, ProjectorConfig, RecordsConfig, StoreConfig};
pub use error::{SdkError, SdkResult};
pub use service::{PlanService, ShutdownReport};

// Re-export key types
pub use plan_fabric::DeadLetterRecord;
pub use plan_index::{IndexNode, PlanQuery, Relation};
pub use plan_records::{DeleteOutcome, ReadOutcome, RecordError, WriteMode};
pub use plan_types::{ChangeEvent, Fingerprint, PlanRecord, RecordMetadata};
