//! Pure projection of a plan document into index nodes.

use chrono::NaiveDate;
use plan_types::fields;
use serde_json::{Map, Value};

use crate::error::{ProjectionError, ProjectionResult};
use crate::node::{IndexNode, Relation};

/// Project a stored plan into its node set: the plan node followed by its
/// descendants in document order.
///
/// `object_id` must match the document's own `objectId`. Missing ids, wrong
/// scalar types, or an unparseable `creationDate` yield
/// [`ProjectionError::Malformed`].
pub fn project(object_id: &str, data: &Value) -> ProjectionResult<Vec<IndexNode>> {
    let doc = Fields::root(object_id, data)?;
    let plan_id = doc.string(fields::OBJECT_ID)?;
    if plan_id != object_id {
        return Err(ProjectionError::malformed(
            object_id,
            format!("document objectId is {plan_id:?}"),
        ));
    }

    let mut nodes = Vec::new();

    let mut plan = doc.node(Relation::Plan, None, plan_id)?;
    plan.plan_type = Some(doc.string(fields::PLAN_TYPE)?.to_string());
    let date = doc.string(fields::CREATION_DATE)?;
    plan.creation_date = Some(
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| doc.malformed(fields::CREATION_DATE, e))?,
    );
    nodes.push(plan);

    let cost = doc.object(fields::PLAN_COST_SHARES)?;
    let mut cost_node = cost.node(Relation::PlanCostShare, Some(plan_id), plan_id)?;
    cost_node.deductible = Some(cost.integer(fields::DEDUCTIBLE)?);
    cost_node.copay = Some(cost.integer(fields::COPAY)?);
    nodes.push(cost_node);

    for group in doc.objects(fields::LINKED_PLAN_SERVICES)? {
        let group_node = group.node(Relation::LinkedPlanService, Some(plan_id), plan_id)?;
        let group_id = group_node.object_id.clone();

        let service = group.object(fields::LINKED_SERVICE)?;
        let service_cost = group.object(fields::PLAN_SERVICE_COST_SHARES)?;

        let mut service_node = service.node(Relation::LinkedService, Some(&group_id), plan_id)?;
        service_node.name = Some(service.string(fields::NAME)?.to_string());

        let mut cost_node =
            service_cost.node(Relation::ServiceCostShare, Some(&group_id), plan_id)?;
        cost_node.deductible = Some(service_cost.integer(fields::DEDUCTIBLE)?);
        cost_node.copay = Some(service_cost.integer(fields::COPAY)?);
        cost_node.service_id = Some(group_id);

        nodes.push(group_node);
        nodes.push(service_node);
        nodes.push(cost_node);
    }

    Ok(nodes)
}

/// A JSON object plus its path, for error messages.
struct Fields<'a> {
    plan: &'a str,
    path: String,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn root(plan: &'a str, value: &'a Value) -> ProjectionResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| ProjectionError::malformed(plan, "document is not an object"))?;
        Ok(Self {
            plan,
            path: String::new(),
            map,
        })
    }

    fn at(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.path)
        }
    }

    fn malformed(&self, key: &str, reason: impl std::fmt::Display) -> ProjectionError {
        ProjectionError::malformed(self.plan, format!("{}: {reason}", self.at(key)))
    }

    fn get(&self, key: &str) -> ProjectionResult<&'a Value> {
        self.map
            .get(key)
            .ok_or_else(|| self.malformed(key, "missing"))
    }

    fn string(&self, key: &str) -> ProjectionResult<&'a str> {
        self.get(key)?
            .as_str()
            .ok_or_else(|| self.malformed(key, "expected a string"))
    }

    fn integer(&self, key: &str) -> ProjectionResult<i64> {
        self.get(key)?
            .as_i64()
            .ok_or_else(|| self.malformed(key, "expected an integer"))
    }

    fn object(&self, key: &str) -> ProjectionResult<Fields<'a>> {
        let map = self
            .get(key)?
            .as_object()
            .ok_or_else(|| self.malformed(key, "expected an object"))?;
        Ok(Fields {
            plan: self.plan,
            path: self.at(key),
            map,
        })
    }

    fn objects(&self, key: &str) -> ProjectionResult<Vec<Fields<'a>>> {
        let items = self
            .get(key)?
            .as_array()
            .ok_or_else(|| self.malformed(key, "expected an array"))?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let path = format!("{}[{i}]", self.at(key));
                let map = item.as_object().ok_or_else(|| {
                    ProjectionError::malformed(self.plan, format!("{path}: expected an object"))
                })?;
                Ok(Fields {
                    plan: self.plan,
                    path,
                    map,
                })
            })
            .collect()
    }

    fn node(
        &self,
        relation: Relation,
        parent: Option<&str>,
        plan_id: &str,
    ) -> ProjectionResult<IndexNode> {
        let id = self.string(fields::OBJECT_ID)?;
        if id.is_empty() {
            return Err(self.malformed(fields::OBJECT_ID, "empty id"));
        }
        Ok(IndexNode::new(
            id,
            relation,
            parent,
            plan_id,
            self.string(fields::OBJECT_TYPE)?,
            self.string(fields::ORG)?,
        ))
    }
}
