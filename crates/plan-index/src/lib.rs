//! Search projection of plan records.
//!
//! Each plan is flattened into a small parent/child graph of [`IndexNode`]s:
//!
//! ```text
//! plan
//! ├── planCostShare
//! └── linkedPlanService (one per service group)
//!     ├── linkedService
//!     └── serviceCostShare
//! ```
//!
//! [`ProjectionWorker`] consumes change events from a
//! [`ChangeChannel`](plan_fabric::ChangeChannel) and replaces or removes a
//! plan's subtree in an [`IndexBackend`] as a unit. Events that cannot be
//! projected are dead-lettered and picked up by [`DeadLetterRecorder`].

pub mod backend;
pub mod error;
pub mod node;
pub mod project;
pub mod query;
pub mod worker;

pub use backend::{InMemoryIndex, IndexBackend};
pub use error::{ProjectionError, ProjectionResult};
pub use node::{IndexNode, Relation};
pub use project::project;
pub use query::{search, PlanQuery};
pub use worker::{apply, DeadLetterRecorder, Disposition, ProjectionWorker, WorkerStats};
