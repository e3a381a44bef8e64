use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use plan_fabric::ChangeChannel;
use plan_schema::{Validator, Violation, ViolationKind};
use plan_store::{CasOutcome, KeyedStore, StoreResult};
use plan_types::{fields, object_id_of, ChangeEvent, Fingerprint, NestedPosition, PlanRecord, RecordMetadata};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{RecordConfig, WriteMode};
use crate::error::{RecordError, RecordResult};
use crate::nested::{entity_ids, find_nested, remove_nested, NestedIndex};
use crate::retry::{retry, Failure};
use crate::stored;

/// Result of a conditional read.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadOutcome {
    /// The caller's fingerprint is current.
    NotModified(Fingerprint),
    Modified(PlanRecord),
}

/// What a delete removed.
#[derive(Clone, Debug, PartialEq)]
pub enum DeleteOutcome {
    /// A whole plan was deleted.
    Record { object_id: String },
    /// A nested entity was removed and its owning plan re-saved.
    Nested {
        child_id: String,
        position: NestedPosition,
        owner: PlanRecord,
    },
}

/// A nested entity found in the corpus.
#[derive(Clone, Debug, PartialEq)]
pub struct Located {
    pub owner: PlanRecord,
    pub position: NestedPosition,
    /// Stored bytes of the owner, for a conditional write.
    bytes: Vec<u8>,
}

/// Guards every read and write of plan records with a content fingerprint
/// and emits one change event per committed write.
pub struct RecordManager {
    store: Arc<dyn KeyedStore>,
    channel: Arc<dyn ChangeChannel>,
    validator: Arc<dyn Validator>,
    config: RecordConfig,
    nested: NestedIndex,
}

impl RecordManager {
    /// Build a manager and load the reverse index from the store.
    pub async fn open(
        store: Arc<dyn KeyedStore>,
        channel: Arc<dyn ChangeChannel>,
        validator: Arc<dyn Validator>,
        config: RecordConfig,
    ) -> RecordResult<Self> {
        let manager = Self {
            store,
            channel,
            validator,
            config,
            nested: NestedIndex::new(),
        };
        let loaded = manager.refresh_nested_index().await?;
        debug!(records = loaded, mode = ?manager.config.write_mode, "record manager opened");
        Ok(manager)
    }

    pub fn config(&self) -> &RecordConfig {
        &self.config
    }

    /// Rebuild the reverse index from every stored record.
    pub async fn refresh_nested_index(&self) -> RecordResult<usize> {
        let records = self.list().await?;
        self.nested
            .rebuild(records.iter().map(|r| (r.object_id.as_str(), &r.data)));
        Ok(records.len())
    }

    // ---- Reads ----

    pub async fn read(&self, object_id: &str) -> RecordResult<PlanRecord> {
        self.load(object_id)
            .await?
            .map(|(record, _)| record)
            .ok_or_else(|| RecordError::NotFound(object_id.to_string()))
    }

    /// Read unless the caller already holds the current version.
    pub async fn read_if_changed(
        &self,
        object_id: &str,
        known: Option<&Fingerprint>,
    ) -> RecordResult<ReadOutcome> {
        let record = self.read(object_id).await?;
        if known == Some(&record.fingerprint) {
            return Ok(ReadOutcome::NotModified(record.fingerprint));
        }
        Ok(ReadOutcome::Modified(record))
    }

    /// Every stored record, ordered by id. Undecodable entries are skipped.
    pub async fn list(&self) -> RecordResult<Vec<PlanRecord>> {
        let entries = self.store_op("scan_all", || self.store.scan_all()).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, bytes)| match stored::decode(&key, &bytes) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(object_id = %key, error = %e, "skipping undecodable record");
                    None
                }
            })
            .collect())
    }

    // ---- Writes ----

    pub async fn create(&self, document: Value, actor: &str) -> RecordResult<PlanRecord> {
        let object_id = match object_id_of(&document) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(RecordError::invalid(
                    fields::OBJECT_ID,
                    ViolationKind::MissingField,
                    "document must carry a non-empty string objectId",
                ))
            }
        };

        if self.store_op("exists", || self.store.exists(&object_id)).await? {
            return Err(RecordError::AlreadyExists(object_id));
        }
        self.check(&object_id, &document).await?;

        let record = PlanRecord {
            object_id: object_id.clone(),
            fingerprint: plan_crypto::fingerprint(&document),
            data: document,
            metadata: RecordMetadata::created(actor, Utc::now()),
        };
        let bytes = stored::encode(&record)?;

        match self.config.write_mode {
            WriteMode::CompareAndSwap => {
                let outcome = self
                    .store_op("compare_and_set", || {
                        self.store.compare_and_set(&object_id, None, bytes.clone())
                    })
                    .await?;
                if outcome == CasOutcome::Mismatch {
                    return Err(RecordError::AlreadyExists(object_id));
                }
            }
            WriteMode::CheckThenSet => {
                self.store_op("set", || self.store.set(&object_id, bytes.clone()))
                    .await?;
            }
        }
        self.nested.record(&object_id, &record.data);

        info!(object_id = %object_id, fingerprint = %record.fingerprint.short_hex(), actor, "plan created");
        self.emit(upsert_of(&record)).await?;
        Ok(record)
    }

    /// Overwrite a plan with a complete document.
    pub async fn replace(
        &self,
        object_id: &str,
        document: Value,
        expected: Option<&Fingerprint>,
        actor: &str,
    ) -> RecordResult<PlanRecord> {
        let (current, current_bytes) = self.require(object_id).await?;
        if let Some(expected) = expected {
            precondition(&current, expected)?;
        }
        same_identity(object_id, &document)?;
        self.check(object_id, &document).await?;

        let record = next_version(&current, document, actor);
        self.commit(&record, &current_bytes).await?;

        info!(object_id, fingerprint = %record.fingerprint.short_hex(), actor, "plan replaced");
        self.emit(upsert_of(&record)).await?;
        Ok(record)
    }

    /// Deep-merge `partial` into a plan. The fingerprint is mandatory.
    pub async fn patch(
        &self,
        object_id: &str,
        partial: Value,
        expected: Option<&Fingerprint>,
        actor: &str,
    ) -> RecordResult<PlanRecord> {
        let (current, current_bytes) = self.require(object_id).await?;
        let Some(expected) = expected else {
            return Err(RecordError::PreconditionFailed {
                object_id: object_id.to_string(),
                expected: None,
                current: current.fingerprint,
            });
        };
        precondition(&current, expected)?;

        let partial = unwrap_data_envelope(partial);
        let merged = plan_merge::merge(&current.data, &partial);
        same_identity(object_id, &merged)?;
        self.check(object_id, &merged).await?;

        let record = next_version(&current, merged, actor);
        self.commit(&record, &current_bytes).await?;

        info!(object_id, fingerprint = %record.fingerprint.short_hex(), actor, "plan patched");
        self.emit(upsert_of(&record)).await?;
        Ok(record)
    }

    /// Delete a whole plan, or the nested entity with this id wherever it is.
    pub async fn delete(&self, id: &str, actor: &str) -> RecordResult<DeleteOutcome> {
        if self.store_op("exists", || self.store.exists(id)).await? {
            if !self.store_op("delete", || self.store.delete(id)).await? {
                return Err(RecordError::NotFound(id.to_string()));
            }
            self.nested.forget(id);
            info!(object_id = id, actor, "plan deleted");
            self.emit(ChangeEvent::Delete {
                object_id: id.to_string(),
            })
            .await?;
            return Ok(DeleteOutcome::Record {
                object_id: id.to_string(),
            });
        }

        let located = self
            .locate(id)
            .await?
            .ok_or_else(|| RecordError::NotFound(id.to_string()))?;
        let (document, position) = remove_nested(&located.owner.data, id)
            .ok_or_else(|| RecordError::NotFound(id.to_string()))?;

        let record = next_version(&located.owner, document, actor);
        self.commit(&record, &located.bytes).await?;

        info!(
            child_id = id,
            owner = %record.object_id,
            %position,
            fingerprint = %record.fingerprint.short_hex(),
            actor,
            "nested entity removed"
        );
        self.emit(upsert_of(&record)).await?;
        Ok(DeleteOutcome::Nested {
            child_id: id.to_string(),
            position,
            owner: record,
        })
    }

    /// Find the plan holding nested entity `child_id`.
    ///
    /// Tries the reverse index first and confirms the hit against the stored
    /// document; on a miss or a stale entry, scans the whole corpus in key
    /// order and stops at the first owner.
    pub async fn locate(&self, child_id: &str) -> RecordResult<Option<Located>> {
        match self.nested.owner_of(child_id) {
            Some(owner) if owner != child_id => {
                if let Some((record, bytes)) = self.load(&owner).await? {
                    if let Some(position) = find_nested(&record.data, child_id) {
                        return Ok(Some(Located {
                            owner: record,
                            position,
                            bytes,
                        }));
                    }
                }
                warn!(child_id, owner = %owner, "stale reverse-index entry; scanning corpus");
            }
            Some(_) => {}
            None => warn!(child_id, "reverse-index miss; scanning corpus"),
        }

        let entries = self.store_op("scan_all", || self.store.scan_all()).await?;
        for (key, bytes) in entries {
            let record = match stored::decode(&key, &bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(object_id = %key, error = %e, "skipping undecodable record");
                    continue;
                }
            };
            if let Some(position) = find_nested(&record.data, child_id) {
                self.nested.record(&key, &record.data);
                return Ok(Some(Located {
                    owner: record,
                    position,
                    bytes,
                }));
            }
        }
        Ok(None)
    }

    /// Publish an `Upsert` for every stored record. Returns how many.
    pub async fn republish_all(&self) -> RecordResult<usize> {
        let records = self.list().await?;
        for record in &records {
            self.emit(upsert_of(record)).await?;
        }
        info!(records = records.len(), "republished all records");
        Ok(records.len())
    }

    // ---- Internals ----

    async fn load(&self, object_id: &str) -> RecordResult<Option<(PlanRecord, Vec<u8>)>> {
        let bytes = self.store_op("get", || self.store.get(object_id)).await?;
        match bytes {
            Some(bytes) => Ok(Some((stored::decode(object_id, &bytes)?, bytes))),
            None => Ok(None),
        }
    }

    async fn require(&self, object_id: &str) -> RecordResult<(PlanRecord, Vec<u8>)> {
        self.load(object_id)
            .await?
            .ok_or_else(|| RecordError::NotFound(object_id.to_string()))
    }

    /// Schema validation, then corpus-wide id uniqueness.
    async fn check(&self, object_id: &str, document: &Value) -> RecordResult<()> {
        self.validator
            .validate(document)
            .map_err(RecordError::ValidationFailed)?;
        if !self.config.enforce_unique_nested_ids {
            return Ok(());
        }

        let mut violations = Vec::new();
        for id in entity_ids(document) {
            let Some(owner) = self.nested.owner_of(id) else {
                continue;
            };
            if owner == object_id {
                continue;
            }
            let still_owned = match self.load(&owner).await? {
                Some((record, _)) => entity_ids(&record.data).contains(&id),
                None => false,
            };
            if still_owned {
                violations.push(Violation::new(
                    id,
                    ViolationKind::DuplicateId,
                    format!("objectId {id:?} already belongs to plan {owner}"),
                ));
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(RecordError::ValidationFailed(violations))
        }
    }

    /// Persist `record` over the version whose stored bytes were `read`.
    async fn commit(&self, record: &PlanRecord, read: &[u8]) -> RecordResult<()> {
        let key = record.object_id.as_str();
        let bytes = stored::encode(record)?;
        match self.config.write_mode {
            WriteMode::CompareAndSwap => {
                let outcome = self
                    .store_op("compare_and_set", || {
                        self.store.compare_and_set(key, Some(read), bytes.clone())
                    })
                    .await?;
                if outcome == CasOutcome::Mismatch {
                    warn!(object_id = key, "concurrent write detected");
                    return Err(RecordError::Conflict(key.to_string()));
                }
            }
            WriteMode::CheckThenSet => {
                self.store_op("set", || self.store.set(key, bytes.clone()))
                    .await?;
            }
        }
        self.nested.record(key, &record.data);
        Ok(())
    }

    async fn emit(&self, event: ChangeEvent) -> RecordResult<()> {
        let object_id = event.object_id().to_string();
        match retry(&self.config.retry, "publish", || self.channel.publish(event.clone())).await {
            Ok(envelope) => {
                debug!(object_id = %object_id, event_id = %envelope.event_id, kind = event.kind(), "change event emitted");
                Ok(())
            }
            Err(failure) => {
                warn!(object_id = %object_id, error = %failure, "record persisted but change event was not published");
                Err(RecordError::TransientStoreError(format!(
                    "record {object_id} persisted but its change event was not published: {failure}"
                )))
            }
        }
    }

    async fn store_op<T, F, Fut>(&self, operation: &'static str, call: F) -> RecordResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        retry(&self.config.retry, operation, call)
            .await
            .map_err(|failure| match failure {
                Failure::Permanent(e) => RecordError::Storage(e),
                exhausted @ Failure::Exhausted { .. } => {
                    RecordError::TransientStoreError(format!("{operation} {exhausted}"))
                }
            })
    }
}

impl std::fmt::Debug for RecordManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordManager")
            .field("config", &self.config)
            .field("nested", &self.nested)
            .finish()
    }
}

fn precondition(current: &PlanRecord, expected: &Fingerprint) -> RecordResult<()> {
    if *expected == current.fingerprint {
        return Ok(());
    }
    Err(RecordError::PreconditionFailed {
        object_id: current.object_id.clone(),
        expected: Some(*expected),
        current: current.fingerprint,
    })
}

fn same_identity(object_id: &str, document: &Value) -> RecordResult<()> {
    match object_id_of(document) {
        Some(id) if id == object_id => Ok(()),
        other => Err(RecordError::invalid(
            fields::OBJECT_ID,
            ViolationKind::InvalidFormat,
            format!("document objectId {other:?} does not match record {object_id:?}"),
        )),
    }
}

fn next_version(current: &PlanRecord, data: Value, actor: &str) -> PlanRecord {
    PlanRecord {
        object_id: current.object_id.clone(),
        fingerprint: plan_crypto::fingerprint(&data),
        data,
        metadata: current.metadata.touched(actor, Utc::now()),
    }
}

fn upsert_of(record: &PlanRecord) -> ChangeEvent {
    ChangeEvent::Upsert {
        object_id: record.object_id.clone(),
        data: record.data.clone(),
    }
}

/// Accept a full `{"data": {...}}` response envelope as a patch body.
fn unwrap_data_envelope(partial: Value) -> Value {
    const ENVELOPE_KEYS: [&str; 3] = ["data", "metadata", "fingerprint"];
    match partial {
        Value::Object(mut map)
            if map.get("data").is_some_and(Value::is_object)
                && map.keys().all(|k| ENVELOPE_KEYS.contains(&k.as_str())) =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}
