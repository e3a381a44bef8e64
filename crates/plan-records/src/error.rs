use plan_schema::Violation;
use plan_types::Fingerprint;

/// Errors returned by record manager operations.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// The caller's fingerprint is missing or stale. Nothing was written.
    #[error("precondition failed for {object_id}: current fingerprint is {current}")]
    PreconditionFailed {
        object_id: String,
        expected: Option<Fingerprint>,
        current: Fingerprint,
    },

    #[error("validation failed: {}", describe(.0))]
    ValidationFailed(Vec<Violation>),

    /// Another writer committed between this operation's read and write.
    #[error("concurrent modification of {0}")]
    Conflict(String),

    /// A transient failure persisted past the retry budget.
    #[error("transient store error: {0}")]
    TransientStoreError(String),

    /// Stored bytes under `object_id` could not be decoded.
    #[error("corrupt record {object_id}: {reason}")]
    Corrupt { object_id: String, reason: String },

    /// A non-transient storage failure.
    #[error("storage error: {0}")]
    Storage(plan_store::StoreError),
}

impl RecordError {
    pub(crate) fn invalid(path: impl Into<String>, kind: plan_schema::ViolationKind, description: impl Into<String>) -> Self {
        Self::ValidationFailed(vec![Violation::new(path, kind, description)])
    }
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type RecordResult<T> = Result<T, RecordError>;
