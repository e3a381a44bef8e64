//! Deep-merge patch engine for plan documents.
//!
//! [`merge`] computes the next state of a document from its current state and
//! a partial patch. It is a pure function: no I/O, no validation, total over
//! any two trees. Callers validate the result before committing it.
//!
//! # Rules
//!
//! - Map + map merges key by key, recursively.
//! - Array + array uses [`merge_arrays`]: identifiable elements (maps with a
//!   string `objectId`) are replaced in place or appended; everything else is
//!   appended unless a structurally equal element already exists.
//! - Any other combination replaces the existing value with the patch value,
//!   including type changes.
//! - A patch never removes anything. `null` is stored as `null`, not treated
//!   as a deletion marker, and array elements missing from the patch stay.

use plan_types::{object_id_of, TreeMap};
use serde_json::Value;

/// Merge `patch` into `existing`, returning the merged tree.
pub fn merge(existing: &Value, patch: &Value) -> Value {
    match (existing, patch) {
        (Value::Object(current), Value::Object(changes)) => Value::Object(merge_maps(current, changes)),
        (Value::Array(current), Value::Array(changes)) => Value::Array(merge_arrays(current, changes)),
        _ => patch.clone(),
    }
}

/// Merge two maps. Keys only in `existing` are kept as-is; keys in `patch`
/// are merged into (or added to) the result.
pub fn merge_maps(existing: &TreeMap, patch: &TreeMap) -> TreeMap {
    let mut result = existing.clone();
    for (key, incoming) in patch {
        let merged = match result.get(key) {
            Some(current) => merge(current, incoming),
            None => incoming.clone(),
        };
        result.insert(key.clone(), merged);
    }
    result
}

/// Merge two arrays as a monotonic union/replace.
///
/// Starts from a copy of `existing` and walks `patch` in order:
/// - a map with a string `objectId` replaces the first element carrying the
///   same id (index preserved) when the two differ, or is appended when no
///   element carries that id;
/// - any other element is appended only if no equal element is present.
///
/// Lookups run against the array being built, so repeated ids inside one
/// patch collapse into a single slot.
pub fn merge_arrays(existing: &[Value], patch: &[Value]) -> Vec<Value> {
    let mut result = existing.to_vec();

    for element in patch {
        match identity_of(element) {
            Some(id) => {
                let slot = result
                    .iter()
                    .position(|candidate| identity_of(candidate) == Some(id));
                match slot {
                    Some(index) if result[index] != *element => result[index] = element.clone(),
                    Some(_) => {}
                    None => result.push(element.clone()),
                }
            }
            None => {
                if !result.contains(element) {
                    result.push(element.clone());
                }
            }
        }
    }

    result
}

fn identity_of(value: &Value) -> Option<&str> {
    match value {
        Value::Object(_) => object_id_of(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map};

    // -----------------------------------------------------------------------
    // Map rules
    // -----------------------------------------------------------------------

    #[test]
    fn scalar_patch_replaces_field_and_keeps_others() {
        let existing = json!({"objectId": "P1", "planType": "inNetwork", "_org": "example.com"});
        let merged = merge(&existing, &json!({"planType": "X"}));
        assert_eq!(
            merged,
            json!({"objectId": "P1", "planType": "X", "_org": "example.com"})
        );
    }

    #[test]
    fn nested_maps_merge_recursively() {
        let existing = json!({"planCostShares": {"objectId": "CS1", "deductible": 2000, "copay": 23}});
        let merged = merge(&existing, &json!({"planCostShares": {"copay": 30}}));
        assert_eq!(
            merged,
            json!({"planCostShares": {"objectId": "CS1", "deductible": 2000, "copay": 30}})
        );
    }

    #[test]
    fn type_changes_are_accepted() {
        let existing = json!({"a": {"x": 1}, "b": [1, 2], "c": 5});
        let merged = merge(&existing, &json!({"a": "flat", "b": {"now": "map"}, "c": [5]}));
        assert_eq!(merged, json!({"a": "flat", "b": {"now": "map"}, "c": [5]}));
    }

    #[test]
    fn null_is_a_value_not_a_delete() {
        let merged = merge(&json!({"a": 1, "b": 2}), &json!({"a": null}));
        assert_eq!(merged, json!({"a": null, "b": 2}));
    }

    #[test]
    fn new_keys_are_added() {
        let merged = merge(&json!({"a": 1}), &json!({"b": {"c": 2}}));
        assert_eq!(merged, json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn non_map_root_is_replaced() {
        assert_eq!(merge(&json!({"a": 1}), &json!(7)), json!(7));
        assert_eq!(merge(&json!("x"), &json!({"a": 1})), json!({"a": 1}));
    }

    // -----------------------------------------------------------------------
    // Array rules
    // -----------------------------------------------------------------------

    #[test]
    fn identified_element_is_replaced_in_place() {
        let existing = vec![
            json!({"objectId": "SG1", "v": 1}),
            json!({"objectId": "SG2", "v": 1}),
        ];
        let merged = merge_arrays(&existing, &[json!({"objectId": "SG1", "v": 2})]);
        assert_eq!(
            merged,
            vec![json!({"objectId": "SG1", "v": 2}), json!({"objectId": "SG2", "v": 1})]
        );
    }

    #[test]
    fn identified_element_replacement_is_whole_not_deep() {
        let existing = vec![json!({"objectId": "SG1", "a": 1, "b": 2})];
        let merged = merge_arrays(&existing, &[json!({"objectId": "SG1", "a": 9})]);
        assert_eq!(merged, vec![json!({"objectId": "SG1", "a": 9})]);
    }

    #[test]
    fn unknown_identified_element_is_appended() {
        let existing = vec![json!({"objectId": "SG1"})];
        let merged = merge_arrays(&existing, &[json!({"objectId": "SG2"})]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1], json!({"objectId": "SG2"}));
    }

    #[test]
    fn unidentified_elements_are_deduplicated() {
        let existing = vec![json!(1), json!({"k": "v"})];
        let merged = merge_arrays(&existing, &[json!(1), json!(2), json!({"k": "v"}), json!(2)]);
        assert_eq!(merged, vec![json!(1), json!({"k": "v"}), json!(2)]);
    }

    #[test]
    fn non_string_object_id_is_not_an_identity() {
        let existing = vec![json!({"objectId": 1, "v": "a"})];
        let merged = merge_arrays(&existing, &[json!({"objectId": 1, "v": "b"})]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn missing_elements_are_never_removed() {
        let existing = vec![json!({"objectId": "SG1"}), json!("keep")];
        let merged = merge_arrays(&existing, &[]);
        assert_eq!(merged, existing);
    }

    #[test]
    fn arrays_inside_maps_use_array_merge() {
        let existing = json!({"linkedPlanServices": [{"objectId": "SG1", "v": 1}]});
        let patch = json!({"linkedPlanServices": [{"objectId": "SG2", "v": 1}]});
        let merged = merge(&existing, &patch);
        assert_eq!(merged["linkedPlanServices"].as_array().unwrap().len(), 2);
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (0i64..5).prop_map(Value::from),
            "[ab]{0,2}".prop_map(Value::String),
        ]
    }

    fn arb_tree() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec(("[a-d]", inner), 0..4)
                    .prop_map(|pairs| Value::Object(pairs.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }

    fn arb_element() -> impl Strategy<Value = Value> {
        prop_oneof![
            arb_leaf(),
            ("[xyz]", arb_leaf()).prop_map(|(id, v)| json!({"objectId": id, "v": v})),
            arb_leaf().prop_map(|v| json!({"v": v})),
        ]
    }

    fn arb_map() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::vec(("[a-e]", arb_tree()), 0..6)
            .prop_map(|pairs| pairs.into_iter().collect())
    }

    proptest! {
        #[test]
        fn merge_preserves_and_applies_keys(a in arb_map(), b in arb_map()) {
            let merged = merge(&Value::Object(a.clone()), &Value::Object(b.clone()));
            let merged = merged.as_object().unwrap();
            for (key, value) in &a {
                if !b.contains_key(key) {
                    prop_assert_eq!(merged.get(key), Some(value));
                }
            }
            for (key, value) in &b {
                let expected = match a.get(key) {
                    Some(current) => merge(current, value),
                    None => value.clone(),
                };
                prop_assert_eq!(merged.get(key), Some(&expected));
            }
            prop_assert!(merged.len() <= a.len() + b.len());
        }

        #[test]
        fn array_merge_is_idempotent(
            existing in prop::collection::vec(arb_element(), 0..6),
            patch in prop::collection::vec(arb_element(), 0..6),
        ) {
            let once = merge_arrays(&existing, &patch);
            let twice = merge_arrays(&once, &patch);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn array_merge_never_shrinks(
            existing in prop::collection::vec(arb_element(), 0..6),
            patch in prop::collection::vec(arb_element(), 0..6),
        ) {
            let merged = merge_arrays(&existing, &patch);
            prop_assert!(merged.len() >= existing.len());
            for (index, original) in existing.iter().enumerate() {
                if identity_of(original).is_none() {
                    prop_assert_eq!(&merged[index], original);
                } else {
                    prop_assert_eq!(identity_of(&merged[index]), identity_of(original));
                }
            }
            for element in &patch {
                prop_assert!(merged.contains(element) || identity_of(element).is_some());
            }
        }
    }
}
