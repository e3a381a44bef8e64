/// Errors from keyed store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend is temporarily unreachable. Callers may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A key that the backend cannot represent.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Stored data could not be decoded by the backend.
    #[error("corrupt entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
