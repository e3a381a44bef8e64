//! Searches over the projected parent/child graph.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::backend::IndexBackend;
use crate::error::ProjectionResult;
use crate::node::{IndexNode, Relation};

/// A search against the index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "camelCase")]
pub enum PlanQuery {
    /// Plans whose `_org` matches exactly.
    ByOrg { org: String },
    /// Plans whose `planType` matches exactly.
    ByPlanType { plan_type: String },
    /// Plans containing a service group with this id.
    ByServiceId { service_id: String },
    /// Plans whose direct cost share has `copay >= min`.
    CopayAtLeast { min: i64 },
    /// Every descendant of a plan.
    Children { plan_id: String },
    /// Descendants of a plan with the given relation.
    ChildrenByRelation { plan_id: String, relation: Relation },
}

/// Run `query`, returning matching nodes sorted by object id.
pub async fn search(
    index: &dyn IndexBackend,
    query: &PlanQuery,
) -> ProjectionResult<Vec<IndexNode>> {
    let mut hits = match query {
        PlanQuery::ByOrg { org } => plans_where(index, |n| n.is_plan() && &n.org == org).await?,
        PlanQuery::ByPlanType { plan_type } => {
            plans_where(index, |n| n.is_plan() && n.plan_type.as_ref() == Some(plan_type)).await?
        }
        PlanQuery::ByServiceId { service_id } => {
            plans_where(index, |n| {
                n.relation == Relation::LinkedPlanService && &n.object_id == service_id
            })
            .await?
        }
        PlanQuery::CopayAtLeast { min } => {
            plans_where(index, |n| {
                n.relation == Relation::PlanCostShare && n.copay.is_some_and(|c| c >= *min)
            })
            .await?
        }
        PlanQuery::Children { plan_id } => index
            .nodes_for_plan(plan_id)
            .await?
            .into_iter()
            .filter(|n| !n.is_plan())
            .collect(),
        PlanQuery::ChildrenByRelation { plan_id, relation } => index
            .nodes_for_plan(plan_id)
            .await?
            .into_iter()
            .filter(|n| !n.is_plan() && n.relation == *relation)
            .collect(),
    };
    hits.sort_by(|a, b| a.object_id.cmp(&b.object_id));
    Ok(hits)
}

/// Plan nodes of every plan owning at least one node matching `pred`.
async fn plans_where(
    index: &dyn IndexBackend,
    pred: impl Fn(&IndexNode) -> bool,
) -> ProjectionResult<Vec<IndexNode>> {
    let nodes = index.all_nodes().await?;
    let owners: BTreeSet<&str> = nodes
        .iter()
        .filter(|n| pred(n))
        .map(|n| n.plan_id.as_str())
        .collect();
    Ok(nodes
        .iter()
        .filter(|n| n.is_plan() && owners.contains(n.object_id.as_str()))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryIndex;
    use crate::project::project;
    use serde_json::{json, Value};

    fn make_plan(id: &str, org: &str, plan_type: &str, copay: i64, groups: &[&str]) -> Value {
        let services: Vec<Value> = groups
            .iter()
            .map(|g| {
                json!({
                    "objectId": g, "objectType": "planservice", "_org": org,
                    "linkedService": {
                        "objectId": format!("{g}-ls"), "objectType": "service", "_org": org,
                        "name": "Yearly physical"
                    },
                    "planserviceCostShares": {
                        "objectId": format!("{g}-scs"), "objectType": "membercostshare",
                        "_org": org, "deductible": 10, "copay": 0
                    }
                })
            })
            .collect();
        json!({
            "objectId": id, "objectType": "plan", "_org": org,
            "planType": plan_type, "creationDate": "2017-12-12",
            "planCostShares": {
                "objectId": format!("{id}-cs"), "objectType": "membercostshare", "_org": org,
                "deductible": 2000, "copay": copay
            },
            "linkedPlanServices": services
        })
    }

    async fn make_index() -> InMemoryIndex {
        let index = InMemoryIndex::new();
        for (id, org, kind, copay, groups) in [
            ("P1", "example.com", "inNetwork", 23, vec!["SG1", "SG2"]),
            ("P2", "example.com", "outOfNetwork", 40, vec!["SG3"]),
            ("P3", "other.org", "inNetwork", 5, vec![]),
        ] {
            let nodes = project(id, &make_plan(id, org, kind, copay, &groups)).unwrap();
            index.replace_plan(id, nodes).await.unwrap();
        }
        index
    }

    async fn ids(index: &InMemoryIndex, query: PlanQuery) -> Vec<String> {
        search(index, &query)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.object_id)
            .collect()
    }

    #[tokio::test]
    async fn plans_by_org_and_type() {
        let index = make_index().await;
        let org = PlanQuery::ByOrg { org: "example.com".into() };
        assert_eq!(ids(&index, org).await, vec!["P1", "P2"]);
        let kind = PlanQuery::ByPlanType { plan_type: "inNetwork".into() };
        assert_eq!(ids(&index, kind).await, vec!["P1", "P3"]);
    }

    #[tokio::test]
    async fn plans_by_service_id() {
        let index = make_index().await;
        let query = PlanQuery::ByServiceId { service_id: "SG3".into() };
        assert_eq!(ids(&index, query).await, vec!["P2"]);
        let missing = PlanQuery::ByServiceId { service_id: "SG3-ls".into() };
        assert!(ids(&index, missing).await.is_empty());
    }

    #[tokio::test]
    async fn plans_by_minimum_copay() {
        let index = make_index().await;
        assert_eq!(ids(&index, PlanQuery::CopayAtLeast { min: 23 }).await, vec!["P1", "P2"]);
        assert_eq!(ids(&index, PlanQuery::CopayAtLeast { min: 41 }).await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn children_and_children_by_relation() {
        let index = make_index().await;
        let all = ids(&index, PlanQuery::Children { plan_id: "P1".into() }).await;
        assert_eq!(all.len(), 7);
        assert!(!all.contains(&"P1".to_string()));

        let services = PlanQuery::ChildrenByRelation {
            plan_id: "P1".into(),
            relation: Relation::LinkedService,
        };
        assert_eq!(ids(&index, services).await, vec!["SG1-ls", "SG2-ls"]);

        let unknown = PlanQuery::Children { plan_id: "P9".into() };
        assert!(ids(&index, unknown).await.is_empty());
    }

    #[test]
    fn query_wire_format() {
        let query = PlanQuery::ChildrenByRelation {
            plan_id: "P1".into(),
            relation: Relation::ServiceCostShare,
        };
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({"query": "childrenByRelation", "plan_id": "P1", "relation": "serviceCostShare"})
        );
    }
}
