use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ProjectionError;

/// Join relation of a node to its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    /// Root of a plan's subtree.
    Plan,
    /// The plan's direct cost share.
    PlanCostShare,
    /// A service group under the plan.
    LinkedPlanService,
    /// The service of a service group.
    LinkedService,
    /// The cost share of a service group.
    ServiceCostShare,
}

impl Relation {
    pub const ALL: [Relation; 5] = [
        Relation::Plan,
        Relation::PlanCostShare,
        Relation::LinkedPlanService,
        Relation::LinkedService,
        Relation::ServiceCostShare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::PlanCostShare => "planCostShare",
            Self::LinkedPlanService => "linkedPlanService",
            Self::LinkedService => "linkedService",
            Self::ServiceCostShare => "serviceCostShare",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProjectionError::UnknownRelation(s.to_string()))
    }
}

/// One entity of a plan, flattened for search.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexNode {
    pub object_id: String,
    pub relation: Relation,
    /// `None` only for plan nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// The root plan this node belongs to.
    pub plan_id: String,
    pub object_type: String,
    #[serde(rename = "_org")]
    pub org: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deductible: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copay: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Owning service group, for service cost shares.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

impl IndexNode {
    pub(crate) fn new(
        object_id: &str,
        relation: Relation,
        parent_id: Option<&str>,
        plan_id: &str,
        object_type: &str,
        org: &str,
    ) -> Self {
        Self {
            object_id: object_id.to_string(),
            relation,
            parent_id: parent_id.map(str::to_string),
            plan_id: plan_id.to_string(),
            object_type: object_type.to_string(),
            org: org.to_string(),
            plan_type: None,
            creation_date: None,
            deductible: None,
            copay: None,
            name: None,
            service_id: None,
        }
    }

    pub fn is_plan(&self) -> bool {
        self.relation == Relation::Plan
    }
}
