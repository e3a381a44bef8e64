use std::collections::HashSet;

use chrono::NaiveDate;
use plan_types::fields;
use serde_json::Value;

use crate::error::{SchemaError, SchemaResult};
use crate::violation::{Violation, ViolationKind};

/// Structural check applied to every document before it is committed.
pub trait Validator: Send + Sync {
    /// Accept `document` or return every violation found.
    fn validate(&self, document: &Value) -> Result<(), Vec<Violation>>;

    /// Parse raw JSON bytes and validate the result.
    fn parse_and_validate(&self, bytes: &[u8]) -> SchemaResult<Value> {
        let document: Value =
            serde_json::from_slice(bytes).map_err(|e| SchemaError::Parse(e.to_string()))?;
        self.validate(&document).map_err(SchemaError::Invalid)?;
        Ok(document)
    }
}

/// Validator that accepts every document.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _document: &Value) -> Result<(), Vec<Violation>> {
        Ok(())
    }
}

/// Validator for the plan document layout.
///
/// Checks required fields, scalar types, the `creationDate` format, and that
/// no `objectId` appears twice within one document. Unknown fields are
/// allowed.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanSchemaValidator;

impl Validator for PlanSchemaValidator {
    fn validate(&self, document: &Value) -> Result<(), Vec<Violation>> {
        let mut check = Check::default();
        check.plan(document);
        if check.violations.is_empty() {
            Ok(())
        } else {
            Err(check.violations)
        }
    }
}

#[derive(Default)]
struct Check {
    violations: Vec<Violation>,
    seen_ids: HashSet<String>,
}

impl Check {
    fn plan(&mut self, doc: &Value) {
        let Some(map) = doc.as_object() else {
            self.push("", ViolationKind::WrongType, "plan must be an object");
            return;
        };
        self.entity_header(doc, "");
        self.string(map.get(fields::PLAN_TYPE), &join("", fields::PLAN_TYPE));

        let date_path = join("", fields::CREATION_DATE);
        if let Some(date) = self.string(map.get(fields::CREATION_DATE), &date_path) {
            if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                self.push(
                    &date_path,
                    ViolationKind::InvalidFormat,
                    format!("expected a yyyy-MM-dd date, got {date:?}"),
                );
            }
        }

        let cost_path = join("", fields::PLAN_COST_SHARES);
        if let Some(cost) = self.object(map.get(fields::PLAN_COST_SHARES), &cost_path) {
            self.cost_share(cost, &cost_path);
        }

        let services_path = join("", fields::LINKED_PLAN_SERVICES);
        match map.get(fields::LINKED_PLAN_SERVICES) {
            None => self.violations.push(Violation::missing(services_path)),
            Some(Value::Array(groups)) => {
                for (index, group) in groups.iter().enumerate() {
                    self.service_group(group, &format!("{services_path}[{index}]"));
                }
            }
            Some(_) => self.push(&services_path, ViolationKind::WrongType, "expected an array"),
        }
    }

    fn service_group(&mut self, group: &Value, path: &str) {
        let Some(map) = group.as_object() else {
            self.push(path, ViolationKind::WrongType, "expected an object");
            return;
        };
        self.entity_header(group, path);

        let service_path = join(path, fields::LINKED_SERVICE);
        if let Some(service) = self.object(map.get(fields::LINKED_SERVICE), &service_path) {
            self.entity_header(service, &service_path);
            self.string(service.get(fields::NAME), &join(&service_path, fields::NAME));
        }

        let cost_path = join(path, fields::PLAN_SERVICE_COST_SHARES);
        if let Some(cost) = self.object(map.get(fields::PLAN_SERVICE_COST_SHARES), &cost_path) {
            self.cost_share(cost, &cost_path);
        }
    }

    fn cost_share(&mut self, cost: &Value, path: &str) {
        self.entity_header(cost, path);
        self.integer(cost.get(fields::DEDUCTIBLE), &join(path, fields::DEDUCTIBLE));
        self.integer(cost.get(fields::COPAY), &join(path, fields::COPAY));
    }

    /// `objectId`, `objectType`, `_org`, plus the per-document id uniqueness check.
    fn entity_header(&mut self, entity: &Value, path: &str) {
        let id_path = join(path, fields::OBJECT_ID);
        if let Some(id) = self.string(entity.get(fields::OBJECT_ID), &id_path) {
            if id.is_empty() {
                self.push(&id_path, ViolationKind::InvalidFormat, "objectId must not be empty");
            } else if !self.seen_ids.insert(id.to_string()) {
                self.push(
                    &id_path,
                    ViolationKind::DuplicateId,
                    format!("objectId {id:?} appears more than once in the document"),
                );
            }
        }
        self.string(entity.get(fields::OBJECT_TYPE), &join(path, fields::OBJECT_TYPE));
        self.string(entity.get(fields::ORG), &join(path, fields::ORG));
    }

    fn string<'a>(&mut self, value: Option<&'a Value>, path: &str) -> Option<&'a str> {
        match value {
            None => {
                self.violations.push(Violation::missing(path));
                None
            }
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                self.push(path, ViolationKind::WrongType, "expected a string");
                None
            }
        }
    }

    fn object<'a>(&mut self, value: Option<&'a Value>, path: &str) -> Option<&'a Value> {
        match value {
            None => {
                self.violations.push(Violation::missing(path));
                None
            }
            Some(v @ Value::Object(_)) => Some(v),
            Some(_) => {
                self.push(path, ViolationKind::WrongType, "expected an object");
                None
            }
        }
    }

    fn integer(&mut self, value: Option<&Value>, path: &str) {
        match value {
            None => self.violations.push(Violation::missing(path)),
            Some(Value::Number(n)) if n.is_i64() => {}
            Some(Value::Number(n)) if n.is_u64() => {
                self.push(path, ViolationKind::WrongType, "integer out of range")
            }
            Some(_) => self.push(path, ViolationKind::WrongType, "expected an integer"),
        }
    }

    fn push(&mut self, path: &str, kind: ViolationKind, description: impl Into<String>) {
        self.violations.push(Violation::new(path, kind, description));
    }
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_plan() -> Value {
        json!({
            "objectId": "12xvxc345ssdsds-508",
            "objectType": "plan",
            "_org": "example.com",
            "planType": "inNetwork",
            "creationDate": "2017-12-12",
            "planCostShares": {
                "objectId": "1234vxc2324sdf-501",
                "objectType": "membercostshare",
                "_org": "example.com",
                "deductible": 2000,
                "copay": 23
            },
            "linkedPlanServices": [{
                "objectId": "27283xvx9asdff-504",
                "objectType": "planservice",
                "_org": "example.com",
                "linkedService": {
                    "objectId": "1234520xvc30asdf-502",
                    "objectType": "service",
                    "_org": "example.com",
                    "name": "Yearly physical"
                },
                "planserviceCostShares": {
                    "objectId": "1234512xvc1314asdfs-503",
                    "objectType": "membercostshare",
                    "_org": "example.com",
                    "deductible": 10,
                    "copay": 0
                }
            }]
        })
    }

    fn kinds_at(violations: &[Violation], path: &str) -> Vec<ViolationKind> {
        violations
            .iter()
            .filter(|v| v.path == path)
            .map(|v| v.kind)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Accepting
    // -----------------------------------------------------------------------

    #[test]
    fn well_formed_plan_is_accepted() {
        assert!(PlanSchemaValidator.validate(&make_plan()).is_ok());
    }

    #[test]
    fn unknown_fields_are_allowed() {
        let mut plan = make_plan();
        plan["extra"] = json!({"anything": [1, 2]});
        assert!(PlanSchemaValidator.validate(&plan).is_ok());
    }

    #[test]
    fn empty_service_list_is_allowed() {
        let mut plan = make_plan();
        plan["linkedPlanServices"] = json!([]);
        assert!(PlanSchemaValidator.validate(&plan).is_ok());
    }

    #[test]
    fn accept_all_accepts_anything() {
        assert!(AcceptAll.validate(&json!(42)).is_ok());
    }

    // -----------------------------------------------------------------------
    // Rejecting
    // -----------------------------------------------------------------------

    #[test]
    fn non_object_root_is_rejected() {
        let errs = PlanSchemaValidator.validate(&json!([1])).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind, ViolationKind::WrongType);
    }

    #[test]
    fn missing_fields_are_reported_with_paths() {
        let mut plan = make_plan();
        plan.as_object_mut().unwrap().remove("planType");
        plan["linkedPlanServices"][0]["linkedService"]
            .as_object_mut()
            .unwrap()
            .remove("name");
        let errs = PlanSchemaValidator.validate(&plan).unwrap_err();
        assert_eq!(kinds_at(&errs, "planType"), vec![ViolationKind::MissingField]);
        assert_eq!(
            kinds_at(&errs, "linkedPlanServices[0].linkedService.name"),
            vec![ViolationKind::MissingField]
        );
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn non_integer_cost_is_rejected() {
        let mut plan = make_plan();
        plan["planCostShares"]["copay"] = json!("23");
        plan["linkedPlanServices"][0]["planserviceCostShares"]["deductible"] = json!(1.5);
        let errs = PlanSchemaValidator.validate(&plan).unwrap_err();
        assert_eq!(kinds_at(&errs, "planCostShares.copay"), vec![ViolationKind::WrongType]);
        assert_eq!(
            kinds_at(&errs, "linkedPlanServices[0].planserviceCostShares.deductible"),
            vec![ViolationKind::WrongType]
        );
    }

    #[test]
    fn cost_beyond_signed_range_is_rejected() {
        let mut plan = make_plan();
        plan["planCostShares"]["copay"] = json!(9_223_372_036_854_775_808u64);
        let errs = PlanSchemaValidator.validate(&plan).unwrap_err();
        assert_eq!(kinds_at(&errs, "planCostShares.copay"), vec![ViolationKind::WrongType]);
        assert_eq!(errs.len(), 1);

        plan["planCostShares"]["copay"] = json!(i64::MAX);
        assert!(PlanSchemaValidator.validate(&plan).is_ok());
    }

    #[test]
    fn bad_creation_date_is_rejected() {
        let mut plan = make_plan();
        plan["creationDate"] = json!("12-12-2017");
        let errs = PlanSchemaValidator.validate(&plan).unwrap_err();
        assert_eq!(kinds_at(&errs, "creationDate"), vec![ViolationKind::InvalidFormat]);
    }

    #[test]
    fn duplicate_ids_within_document_are_rejected() {
        let mut plan = make_plan();
        plan["linkedPlanServices"][0]["linkedService"]["objectId"] = json!("1234vxc2324sdf-501");
        let errs = PlanSchemaValidator.validate(&plan).unwrap_err();
        assert_eq!(
            kinds_at(&errs, "linkedPlanServices[0].linkedService.objectId"),
            vec![ViolationKind::DuplicateId]
        );
    }

    #[test]
    fn empty_object_id_is_rejected() {
        let mut plan = make_plan();
        plan["objectId"] = json!("");
        let errs = PlanSchemaValidator.validate(&plan).unwrap_err();
        assert_eq!(kinds_at(&errs, "objectId"), vec![ViolationKind::InvalidFormat]);
    }

    #[test]
    fn services_must_be_an_array() {
        let mut plan = make_plan();
        plan["linkedPlanServices"] = json!({"objectId": "x"});
        let errs = PlanSchemaValidator.validate(&plan).unwrap_err();
        assert_eq!(kinds_at(&errs, "linkedPlanServices"), vec![ViolationKind::WrongType]);
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parse_and_validate_reports_parse_errors() {
        let err = PlanSchemaValidator.parse_and_validate(b"{not json").unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }

    #[test]
    fn parse_and_validate_returns_document() {
        let bytes = serde_json::to_vec(&make_plan()).unwrap();
        let doc = PlanSchemaValidator.parse_and_validate(&bytes).unwrap();
        assert_eq!(doc, make_plan());
    }

    #[test]
    fn violation_display_uses_root_marker() {
        let v = Violation::new("", ViolationKind::WrongType, "plan must be an object");
        assert_eq!(v.to_string(), "$: plan must be an object");
    }
}
