//! Deterministic deep-merge of JSON object maps.
//!
//! The resolver merges ancestor data in chain order (GLOBAL → PROJECT →
//! BRANCH → TASK) so the most specific level wins per key. Nested objects
//! merge recursively; any non-object value is replaced wholesale (arrays
//! are values, not merge targets).
//!
//! Two flavors:
//!
//! - [`deep_merge`]: lenient — a kind mismatch means the overlay replaces
//!   the base. Used for inheritance resolution, which must never fail.
//! - [`deep_merge_strict`]: a map/non-map mismatch is a [`MergeConflict`].
//!   Used by the delegation worker so a bad payload fails the entry
//!   instead of silently clobbering structured target data.

use serde_json::{Map, Value};

use crate::errors::MergeConflict;

/// Merge `overlay` into `base`, overlay winning per key, recursing into
/// nested objects.
pub fn deep_merge(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, overlay_value) in overlay {
        match (base.get_mut(key), overlay_value) {
            (Some(Value::Object(base_obj)), Value::Object(overlay_obj)) => {
                deep_merge(base_obj, overlay_obj);
            }
            _ => {
                let _ = base.insert(key.clone(), overlay_value.clone());
            }
        }
    }
}

/// Merge `overlay` into `base`, failing on a map/non-map kind mismatch.
///
/// Identical keys with object values on both sides recurse; identical keys
/// where exactly one side is an object produce a [`MergeConflict`] naming
/// the offending path. Scalar-over-scalar and array-over-array replace.
pub fn deep_merge_strict(
    base: &mut Map<String, Value>,
    overlay: &Map<String, Value>,
) -> Result<(), MergeConflict> {
    merge_strict_at(base, overlay, &mut Vec::new())
}

fn merge_strict_at(
    base: &mut Map<String, Value>,
    overlay: &Map<String, Value>,
    path: &mut Vec<String>,
) -> Result<(), MergeConflict> {
    for (key, overlay_value) in overlay {
        match (base.get_mut(key), overlay_value) {
            (Some(Value::Object(base_obj)), Value::Object(overlay_obj)) => {
                path.push(key.clone());
                merge_strict_at(base_obj, overlay_obj, path)?;
                let _ = path.pop();
            }
            (Some(base_value), _)
                if base_value.is_object() != overlay_value.is_object()
                    && !base_value.is_null()
                    && !overlay_value.is_null() =>
            {
                path.push(key.clone());
                return Err(MergeConflict {
                    path: path.join("."),
                    base_kind: json_kind(base_value),
                    overlay_kind: json_kind(overlay_value),
                });
            }
            _ => {
                let _ = base.insert(key.clone(), overlay_value.clone());
            }
        }
    }
    Ok(())
}

/// Human-readable JSON kind name for diagnostics.
#[must_use]
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn overlay_wins_per_key() {
        let mut base = obj(json!({"theme": "dark", "lang": "en"}));
        let overlay = obj(json!({"theme": "light"}));
        deep_merge(&mut base, &overlay);
        assert_eq!(base["theme"], "light");
        assert_eq!(base["lang"], "en");
    }

    #[test]
    fn nested_objects_merge_recursively() {
        let mut base = obj(json!({"editor": {"tabs": 4, "wrap": true}}));
        let overlay = obj(json!({"editor": {"tabs": 2}}));
        deep_merge(&mut base, &overlay);
        assert_eq!(base["editor"]["tabs"], 2);
        assert_eq!(base["editor"]["wrap"], true);
    }

    #[test]
    fn arrays_replace_wholesale() {
        let mut base = obj(json!({"stack": ["Go"]}));
        let overlay = obj(json!({"stack": ["Go", "Postgres"]}));
        deep_merge(&mut base, &overlay);
        assert_eq!(base["stack"], json!(["Go", "Postgres"]));
    }

    #[test]
    fn lenient_kind_mismatch_replaces() {
        let mut base = obj(json!({"config": {"a": 1}}));
        let overlay = obj(json!({"config": "inline"}));
        deep_merge(&mut base, &overlay);
        assert_eq!(base["config"], "inline");
    }

    #[test]
    fn strict_kind_mismatch_errors_with_path() {
        let mut base = obj(json!({"config": {"db": {"host": "x"}}}));
        let overlay = obj(json!({"config": {"db": 5}}));
        let err = deep_merge_strict(&mut base, &overlay).unwrap_err();
        assert_eq!(err.path, "config.db");
        assert_eq!(err.base_kind, "object");
        assert_eq!(err.overlay_kind, "number");
    }

    #[test]
    fn strict_null_base_is_replaceable() {
        let mut base = obj(json!({"slot": null}));
        let overlay = obj(json!({"slot": {"filled": true}}));
        deep_merge_strict(&mut base, &overlay).unwrap();
        assert_eq!(base["slot"]["filled"], true);
    }

    #[test]
    fn chain_order_merges_most_specific_last() {
        let global = obj(json!({"theme": "dark"}));
        let project = obj(json!({"theme": "light", "stack": ["Go"]}));
        let branch = obj(json!({}));
        let task = obj(json!({"progress": 50}));
        let mut merged = Map::new();
        for layer in [&global, &project, &branch, &task] {
            deep_merge(&mut merged, layer);
        }
        assert_eq!(
            Value::Object(merged),
            json!({"theme": "light", "stack": ["Go"], "progress": 50})
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Small JSON value generator (bounded depth).
        fn arb_value() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i32>().prop_map(|n| json!(n)),
                "[a-z]{0,6}".prop_map(Value::String),
            ];
            leaf.prop_recursive(3, 16, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    prop::collection::btree_map("[a-c]", inner, 0..4)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        fn arb_map() -> impl Strategy<Value = Map<String, Value>> {
            prop::collection::btree_map("[a-d]", arb_value(), 0..5)
                .prop_map(|m| m.into_iter().collect())
        }

        proptest! {
            /// Merging the same inputs twice yields identical output.
            #[test]
            fn merge_is_deterministic(base in arb_map(), overlay in arb_map()) {
                let mut first = base.clone();
                deep_merge(&mut first, &overlay);
                let mut second = base;
                deep_merge(&mut second, &overlay);
                prop_assert_eq!(first, second);
            }

            /// Every top-level non-object overlay key appears verbatim in the result.
            #[test]
            fn overlay_scalars_always_win(base in arb_map(), overlay in arb_map()) {
                let mut merged = base;
                deep_merge(&mut merged, &overlay);
                for (key, value) in &overlay {
                    if !value.is_object() {
                        prop_assert_eq!(merged.get(key), Some(value));
                    }
                }
            }

            /// Merging a map over itself is a no-op.
            #[test]
            fn merge_idempotent(map in arb_map()) {
                let mut merged = map.clone();
                deep_merge(&mut merged, &map);
                prop_assert_eq!(merged, map);
            }
        }
    }
}
