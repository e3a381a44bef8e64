//! Structural validation of plan documents.
//!
//! [`Validator`] is the seam the record manager checks every candidate
//! document against before writing it. [`PlanSchemaValidator`] encodes the
//! plan layout; [`AcceptAll`] disables validation.

pub mod error;
pub mod validator;
pub mod violation;

pub use error::{SchemaError, SchemaResult};
pub use validator::{AcceptAll, PlanSchemaValidator, Validator};
pub use violation::{Violation, ViolationKind};
