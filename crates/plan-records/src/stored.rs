//! Byte layout of a record in the keyed store: JSON
//! `{ "data", "metadata", "fingerprint" }` under the plan's `objectId`.

use plan_types::{Fingerprint, PlanRecord, RecordMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RecordError, RecordResult};

#[derive(Serialize, Deserialize)]
struct StoredEnvelope {
    data: Value,
    metadata: RecordMetadata,
    fingerprint: Fingerprint,
}

pub(crate) fn encode(record: &PlanRecord) -> RecordResult<Vec<u8>> {
    let envelope = StoredEnvelope {
        data: record.data.clone(),
        metadata: record.metadata.clone(),
        fingerprint: record.fingerprint,
    };
    serde_json::to_vec(&envelope).map_err(|e| RecordError::Corrupt {
        object_id: record.object_id.clone(),
        reason: e.to_string(),
    })
}

/// Decode stored bytes, checking the fingerprint against the data.
pub(crate) fn decode(object_id: &str, bytes: &[u8]) -> RecordResult<PlanRecord> {
    let corrupt = |reason: String| RecordError::Corrupt {
        object_id: object_id.to_string(),
        reason,
    };
    let envelope: StoredEnvelope =
        serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
    let actual = plan_crypto::fingerprint(&envelope.data);
    if actual != envelope.fingerprint {
        return Err(corrupt(format!(
            "stored fingerprint {} does not match data ({})",
            envelope.fingerprint.short_hex(),
            actual.short_hex()
        )));
    }
    Ok(PlanRecord {
        object_id: object_id.to_string(),
        data: envelope.data,
        metadata: envelope.metadata,
        fingerprint: envelope.fingerprint,
    })
}
