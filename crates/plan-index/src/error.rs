/// Errors from projecting events into the index.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// The event can never be projected. Dead-lettered without retry.
    #[error("malformed document {object_id}: {reason}")]
    Malformed { object_id: String, reason: String },

    /// The index backend is temporarily unreachable.
    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("unknown relation: {0}")]
    UnknownRelation(String),

    #[error("channel error: {0}")]
    Fabric(#[from] plan_fabric::FabricError),
}

impl ProjectionError {
    pub(crate) fn malformed(object_id: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            object_id: object_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a later attempt at the same event may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Fabric(e) => e.is_transient(),
            Self::Malformed { .. } | Self::UnknownRelation(_) => false,
        }
    }
}

pub type ProjectionResult<T> = Result<T, ProjectionError>;
