//! The document tree and the fixed schema positions of a plan.
//!
//! Documents are `serde_json::Value` trees: a tagged variant of
//! `Object | Array | String | Number | Bool | Null`. Every component matches
//! on the variant instead of probing types at runtime.

use serde_json::{Map, Value};

/// A document tree.
pub type Tree = Value;

/// A string-keyed map node of a [`Tree`].
pub type TreeMap = Map<String, Value>;

/// Field names shared by the record manager, the locator, and the projector.
pub mod fields {
    pub const OBJECT_ID: &str = "objectId";
    pub const OBJECT_TYPE: &str = "objectType";
    pub const ORG: &str = "_org";
    pub const PLAN_TYPE: &str = "planType";
    pub const CREATION_DATE: &str = "creationDate";
    pub const PLAN_COST_SHARES: &str = "planCostShares";
    pub const LINKED_PLAN_SERVICES: &str = "linkedPlanServices";
    pub const LINKED_SERVICE: &str = "linkedService";
    pub const PLAN_SERVICE_COST_SHARES: &str = "planserviceCostShares";
    pub const DEDUCTIBLE: &str = "deductible";
    pub const COPAY: &str = "copay";
    pub const NAME: &str = "name";
}

/// The `objectId` of a map node, if it carries a string one.
pub fn object_id_of(value: &Value) -> Option<&str> {
    value.get(fields::OBJECT_ID).and_then(Value::as_str)
}

/// Where a nested entity sits inside a plan document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NestedPosition {
    /// The plan's direct `planCostShares` object.
    CostShare,
    /// The service group at `linkedPlanServices[index]`.
    ServiceGroup { index: usize },
    /// The `linkedService` of the service group at `index`.
    LinkedService { index: usize },
    /// The `planserviceCostShares` of the service group at `index`.
    ServiceCostShare { index: usize },
}

impl NestedPosition {
    /// Index of the owning service group, if the position is inside one.
    pub fn service_index(&self) -> Option<usize> {
        match self {
            Self::CostShare => None,
            Self::ServiceGroup { index }
            | Self::LinkedService { index }
            | Self::ServiceCostShare { index } => Some(*index),
        }
    }
}

impl std::fmt::Display for NestedPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CostShare => write!(f, "{}", fields::PLAN_COST_SHARES),
            Self::ServiceGroup { index } => write!(f, "{}[{index}]", fields::LINKED_PLAN_SERVICES),
            Self::LinkedService { index } => write!(
                f,
                "{}[{index}].{}",
                fields::LINKED_PLAN_SERVICES,
                fields::LINKED_SERVICE
            ),
            Self::ServiceCostShare { index } => write!(
                f,
                "{}[{index}].{}",
                fields::LINKED_PLAN_SERVICES,
                fields::PLAN_SERVICE_COST_SHARES
            ),
        }
    }
}

/// Walk the nested-entity positions of a plan document in lookup order:
/// direct cost share, then per service group the group itself, its linked
/// service, and its service cost share.
///
/// Yields `(position, objectId)` for every position that holds a map with a
/// string `objectId`.
pub fn nested_entities(doc: &Value) -> Vec<(NestedPosition, &str)> {
    let mut out = Vec::new();

    if let Some(id) = doc.get(fields::PLAN_COST_SHARES).and_then(object_id_of) {
        out.push((NestedPosition::CostShare, id));
    }

    if let Some(Value::Array(services)) = doc.get(fields::LINKED_PLAN_SERVICES) {
        for (index, service) in services.iter().enumerate() {
            if let Some(id) = object_id_of(service) {
                out.push((NestedPosition::ServiceGroup { index }, id));
            }
            if let Some(id) = service.get(fields::LINKED_SERVICE).and_then(object_id_of) {
                out.push((NestedPosition::LinkedService { index }, id));
            }
            if let Some(id) = service
                .get(fields::PLAN_SERVICE_COST_SHARES)
                .and_then(object_id_of)
            {
                out.push((NestedPosition::ServiceCostShare { index }, id));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan() -> Value {
        json!({
            "objectId": "P1",
            "planCostShares": {"objectId": "CS1", "deductible": 100, "copay": 10},
            "linkedPlanServices": [
                {
                    "objectId": "SG1",
                    "linkedService": {"objectId": "LS1"},
                    "planserviceCostShares": {"objectId": "SCS1"}
                },
                {
                    "objectId": "SG2",
                    "linkedService": {"objectId": "LS2"},
                    "planserviceCostShares": {"objectId": "SCS2"}
                }
            ]
        })
    }

    #[test]
    fn nested_entities_follow_lookup_order() {
        let doc = plan();
        let ids: Vec<&str> = nested_entities(&doc).into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, vec!["CS1", "SG1", "LS1", "SCS1", "SG2", "LS2", "SCS2"]);
    }

    #[test]
    fn nested_entities_skip_unidentified_nodes() {
        let doc = json!({
            "planCostShares": {"deductible": 1},
            "linkedPlanServices": [{"linkedService": {"objectId": "LS9"}}, 42]
        });
        let found = nested_entities(&doc);
        assert_eq!(found, vec![(NestedPosition::LinkedService { index: 0 }, "LS9")]);
    }

    #[test]
    fn position_display() {
        assert_eq!(NestedPosition::CostShare.to_string(), "planCostShares");
        assert_eq!(
            NestedPosition::LinkedService { index: 2 }.to_string(),
            "linkedPlanServices[2].linkedService"
        );
    }

    #[test]
    fn service_index() {
        assert_eq!(NestedPosition::CostShare.service_index(), None);
        assert_eq!(NestedPosition::ServiceCostShare { index: 3 }.service_index(), Some(3));
    }
}
