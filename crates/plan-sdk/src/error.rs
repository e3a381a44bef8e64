use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Record(#[from] plan_records::RecordError),

    #[error("projection error: {0}")]
    Projection(#[from] plan_index::ProjectionError),

    #[error("store error: {0}")]
    Store(#[from] plan_store::StoreError),

    #[error("channel error: {0}")]
    Fabric(#[from] plan_fabric::FabricError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SdkResult<T> = Result<T, SdkError>;
