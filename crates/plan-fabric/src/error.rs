use std::io;

use crate::envelope::DeliveryTag;

/// Errors produced by the change channel and the dead-letter log.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// I/O error while reading or writing the dead-letter log.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The channel has been closed and accepts no more events.
    #[error("channel is closed")]
    Closed,

    /// Ack/nack for a delivery that is not in flight.
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(DeliveryTag),

    /// The broker is temporarily unreachable. Callers may retry.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

impl FabricError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Convenience alias used throughout the fabric crate.
pub type FabricResult<T> = std::result::Result<T, FabricError>;
