use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mutation of one plan, as seen by downstream consumers.
///
/// Produced once per successful record write and delivered at least once.
/// `Upsert` always carries the complete document, never a patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum ChangeEvent {
    Upsert {
        #[serde(rename = "objectId")]
        object_id: String,
        data: Value,
    },
    Delete {
        #[serde(rename = "objectId")]
        object_id: String,
    },
}

impl ChangeEvent {
    /// The plan this event applies to.
    pub fn object_id(&self) -> &str {
        match self {
            Self::Upsert { object_id, .. } | Self::Delete { object_id } => object_id,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
        }
    }
}
