use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fingerprint::Fingerprint;

/// Audit stamps carried alongside every stored plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Unset until the first write after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RecordMetadata {
    /// Stamps for a freshly created record.
    pub fn created(actor: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            created_by: actor.into(),
            created_at: at,
            updated_by: None,
            updated_at: at,
        }
    }

    /// Copy of these stamps with the update fields advanced.
    ///
    /// `updated_at` never moves backwards, even if the wall clock does.
    pub fn touched(&self, actor: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            updated_by: Some(actor.into()),
            updated_at: at.max(self.updated_at),
        }
    }
}

/// A stored plan: the document, its fingerprint, and its audit stamps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    #[serde(rename = "objectId")]
    pub object_id: String,
    pub data: Value,
    pub metadata: RecordMetadata,
    pub fingerprint: Fingerprint,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn created_stamps_match() {
        let meta = RecordMetadata::created("alice", at(0));
        assert_eq!(meta.created_by, "alice");
        assert_eq!(meta.created_at, meta.updated_at);
        assert!(meta.updated_by.is_none());
    }

    #[test]
    fn touched_keeps_creation_and_advances_update() {
        let meta = RecordMetadata::created("alice", at(0));
        let touched = meta.touched("bob", at(10));
        assert_eq!(touched.created_by, "alice");
        assert_eq!(touched.created_at, at(0));
        assert_eq!(touched.updated_by.as_deref(), Some("bob"));
        assert_eq!(touched.updated_at, at(10));
    }

    #[test]
    fn touched_never_moves_backwards() {
        let meta = RecordMetadata::created("alice", at(10));
        let touched = meta.touched("bob", at(10) - Duration::seconds(5));
        assert_eq!(touched.updated_at, at(10));
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = PlanRecord {
            object_id: "P1".into(),
            data: json!({"objectId": "P1", "planType": "inNetwork"}),
            metadata: RecordMetadata::created("alice", at(0)),
            fingerprint: Fingerprint::from_hash([3; 32]),
        };
        let bytes = serde_json::to_vec(&record).unwrap();
        let back: PlanRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, record);
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw["objectId"], "P1");
        assert!(raw["metadata"].get("updated_by").is_none());
    }
}
