use serde::{Deserialize, Serialize};

/// One reason a document was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Dotted path of the offending node, e.g. `linkedPlanServices[0].linkedService.name`.
    pub path: String,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingField,
    WrongType,
    InvalidFormat,
    DuplicateId,
}

impl Violation {
    pub fn new(path: impl Into<String>, kind: ViolationKind, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            description: description.into(),
        }
    }

    pub fn missing(path: impl Into<String>) -> Self {
        Self::new(path, ViolationKind::MissingField, "required field is missing")
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "$" } else { &self.path };
        write!(f, "{path}: {}", self.description)
    }
}
