use crate::violation::Violation;

/// Errors from schema checking.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("document is not valid JSON: {0}")]
    Parse(String),

    #[error("document failed validation ({} violation(s))", .0.len())]
    Invalid(Vec<Violation>),
}

pub type SchemaResult<T> = Result<T, SchemaError>;
