//! Nested-entity lookup and removal inside plan documents, plus the reverse
//! index from entity id to owning plan.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use plan_types::{fields, nested_entities, object_id_of, NestedPosition};
use serde_json::Value;
use tracing::warn;

/// Position of `child_id` inside `doc`, testing positions in lookup order.
/// The first match wins.
pub fn find_nested(doc: &Value, child_id: &str) -> Option<NestedPosition> {
    nested_entities(doc)
        .into_iter()
        .find(|(_, id)| *id == child_id)
        .map(|(position, _)| position)
}

/// Remove `child_id` from `doc`.
///
/// - the direct cost share stays (it is required); its `deductible` and
///   `copay` are reset to `0`;
/// - a service group, its linked service, or its service cost share drops
///   the whole `linkedPlanServices` entry.
///
/// Returns the updated document and where the id was found, or `None` when
/// the document does not contain it.
pub fn remove_nested(doc: &Value, child_id: &str) -> Option<(Value, NestedPosition)> {
    let position = find_nested(doc, child_id)?;
    let mut updated = doc.clone();

    match position {
        NestedPosition::CostShare => {
            let cost = updated.get_mut(fields::PLAN_COST_SHARES)?.as_object_mut()?;
            cost.insert(fields::DEDUCTIBLE.to_string(), Value::from(0));
            cost.insert(fields::COPAY.to_string(), Value::from(0));
        }
        NestedPosition::ServiceGroup { index }
        | NestedPosition::LinkedService { index }
        | NestedPosition::ServiceCostShare { index } => {
            let services = updated
                .get_mut(fields::LINKED_PLAN_SERVICES)?
                .as_array_mut()?;
            services.remove(index);
        }
    }

    Some((updated, position))
}

/// Every entity id a document claims: its own `objectId` and all nested ids.
pub fn entity_ids(doc: &Value) -> Vec<&str> {
    object_id_of(doc)
        .into_iter()
        .chain(nested_entities(doc).into_iter().map(|(_, id)| id))
        .collect()
}

#[derive(Default)]
struct Owners {
    owner_of: HashMap<String, String>,
    claimed_by: HashMap<String, Vec<String>>,
}

/// Reverse index: entity id -> owning plan id.
///
/// A hint, not a source of truth. Callers confirm a hit against the stored
/// document and fall back to a corpus scan on a miss. A poisoned lock is
/// logged and recovered rather than skipped.
#[derive(Default)]
pub struct NestedIndex {
    inner: RwLock<Owners>,
}

impl NestedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index with the given `(plan id, document)` pairs.
    pub fn rebuild<'a>(&self, records: impl IntoIterator<Item = (&'a str, &'a Value)>) {
        let mut fresh = Owners::default();
        for (owner, doc) in records {
            Self::claim(&mut fresh, owner, doc);
        }
        *self.write() = fresh;
    }

    /// Point every id in `doc` at `owner`, dropping ids the plan no longer has.
    pub fn record(&self, owner: &str, doc: &Value) {
        let mut inner = self.write();
        Self::release(&mut inner, owner);
        Self::claim(&mut inner, owner, doc);
    }

    /// Drop every id owned by `owner`.
    pub fn forget(&self, owner: &str) {
        Self::release(&mut self.write(), owner);
    }

    pub fn owner_of(&self, id: &str) -> Option<String> {
        self.read().owner_of.get(id).cloned()
    }

    /// Number of indexed entity ids.
    pub fn len(&self) -> usize {
        self.read().owner_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Owners> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("nested index lock poisoned; reading recovered state");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Owners> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("nested index lock poisoned; writing over recovered state");
            poisoned.into_inner()
        })
    }

    fn claim(owners: &mut Owners, owner: &str, doc: &Value) {
        let ids: Vec<String> = entity_ids(doc).into_iter().map(str::to_string).collect();
        for id in &ids {
            owners.owner_of.insert(id.clone(), owner.to_string());
        }
        owners.claimed_by.insert(owner.to_string(), ids);
    }

    fn release(owners: &mut Owners, owner: &str) {
        if let Some(ids) = owners.claimed_by.remove(owner) {
            for id in ids {
                if owners.owner_of.get(&id).map(String::as_str) == Some(owner) {
                    owners.owner_of.remove(&id);
                }
            }
        }
    }
}

impl std::fmt::Debug for NestedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedIndex").field("ids", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan() -> Value {
        json!({
            "objectId": "P1",
            "planCostShares": {"objectId": "CS1", "deductible": 2000, "copay": 23},
            "linkedPlanServices": [
                {
                    "objectId": "SG1",
                    "linkedService": {"objectId": "LS1", "name": "Yearly physical"},
                    "planserviceCostShares": {"objectId": "SCS1", "deductible": 10, "copay": 0}
                },
                {
                    "objectId": "SG2",
                    "linkedService": {"objectId": "LS2", "name": "well baby"},
                    "planserviceCostShares": {"objectId": "SCS2", "deductible": 10, "copay": 175}
                }
            ]
        })
    }

    // -----------------------------------------------------------------------
    // Lookup and removal
    // -----------------------------------------------------------------------

    #[test]
    fn find_reports_positions() {
        let doc = plan();
        assert_eq!(find_nested(&doc, "CS1"), Some(NestedPosition::CostShare));
        assert_eq!(find_nested(&doc, "SG2"), Some(NestedPosition::ServiceGroup { index: 1 }));
        assert_eq!(find_nested(&doc, "LS1"), Some(NestedPosition::LinkedService { index: 0 }));
        assert_eq!(
            find_nested(&doc, "SCS2"),
            Some(NestedPosition::ServiceCostShare { index: 1 })
        );
        assert_eq!(find_nested(&doc, "P1"), None);
        assert_eq!(find_nested(&doc, "nope"), None);
    }

    #[test]
    fn removing_cost_share_zeroes_amounts() {
        let (updated, position) = remove_nested(&plan(), "CS1").unwrap();
        assert_eq!(position, NestedPosition::CostShare);
        assert_eq!(
            updated["planCostShares"],
            json!({"objectId": "CS1", "deductible": 0, "copay": 0})
        );
        assert_eq!(updated["linkedPlanServices"], plan()["linkedPlanServices"]);
    }

    #[test]
    fn removing_any_service_member_drops_the_group() {
        for id in ["SG1", "LS1", "SCS1"] {
            let (updated, _) = remove_nested(&plan(), id).unwrap();
            let services = updated["linkedPlanServices"].as_array().unwrap();
            assert_eq!(services.len(), 1, "removing {id}");
            assert_eq!(services[0]["objectId"], "SG2");
        }
    }

    #[test]
    fn removing_unknown_id_is_none() {
        assert!(remove_nested(&plan(), "missing").is_none());
    }

    #[test]
    fn entity_ids_include_root() {
        let doc = plan();
        let ids = entity_ids(&doc);
        assert_eq!(ids[0], "P1");
        assert_eq!(ids.len(), 8);
    }

    // -----------------------------------------------------------------------
    // Reverse index
    // -----------------------------------------------------------------------

    #[test]
    fn rebuild_and_lookup() {
        let doc = plan();
        let index = NestedIndex::new();
        index.rebuild([("P1", &doc)]);
        assert_eq!(index.owner_of("LS2").as_deref(), Some("P1"));
        assert_eq!(index.owner_of("P1").as_deref(), Some("P1"));
        assert_eq!(index.len(), 8);
    }

    #[test]
    fn record_drops_ids_no_longer_present() {
        let index = NestedIndex::new();
        let doc = plan();
        index.record("P1", &doc);
        let (updated, _) = remove_nested(&doc, "LS1").unwrap();
        index.record("P1", &updated);
        assert!(index.owner_of("SG1").is_none());
        assert!(index.owner_of("SCS1").is_none());
        assert_eq!(index.owner_of("SG2").as_deref(), Some("P1"));
    }

    #[test]
    fn forget_keeps_ids_claimed_by_others() {
        let index = NestedIndex::new();
        index.record("P1", &json!({"objectId": "P1", "planCostShares": {"objectId": "CS"}}));
        index.record("P2", &json!({"objectId": "P2", "planCostShares": {"objectId": "CS"}}));
        index.forget("P1");
        assert_eq!(index.owner_of("CS").as_deref(), Some("P2"));
        assert!(index.owner_of("P1").is_none());
    }

    #[test]
    fn poisoned_lock_still_records_and_answers() {
        let index = std::sync::Arc::new(NestedIndex::new());
        let doc = plan();
        index.record("P1", &doc);

        let holder = std::sync::Arc::clone(&index);
        let panicked = std::thread::spawn(move || {
            let _guard = holder.inner.write().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(panicked.is_err());
        assert!(index.inner.is_poisoned());

        assert_eq!(index.owner_of("LS1").as_deref(), Some("P1"));
        index.record("P2", &json!({"objectId": "P2", "planCostShares": {"objectId": "CS9"}}));
        assert_eq!(index.owner_of("CS9").as_deref(), Some("P2"));
        index.forget("P1");
        assert!(index.owner_of("LS1").is_none());
        index.rebuild([("P1", &doc)]);
        assert_eq!(index.len(), 8);
    }
}
