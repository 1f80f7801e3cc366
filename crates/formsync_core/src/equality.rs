//! Structural record equality and minimal diffs.
//!
//! Records are compared after compaction:
//! - a nested record with a positive id, no `version` and no dirty marker
//!   reduces to `{id}`
//! - nulls, transient keys, `selected` and `_dirty` are dropped
//!
//! Scalars compare loosely: numbers against numeric strings by value, and
//! strings that parse as dates by instant.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use formsync_protocol::{is_transient_key, keys, Map, Value};

/// Returns the compact form of a value used for comparisons.
pub fn compact(value: &Value) -> Value {
    match value {
        Value::Object(map) => compact_object(map),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|item| !item.is_null())
                .map(compact)
                .collect(),
        ),
        other => other.clone(),
    }
}

fn compact_object(map: &Map) -> Value {
    let id = map.get(keys::ID).and_then(Value::as_i64);
    let versioned = map.get(keys::VERSION).is_some_and(|v| !v.is_null());
    let dirty = map
        .get(keys::DIRTY)
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(id) = id.filter(|id| *id > 0) {
        if !versioned && !dirty {
            let mut reduced = Map::new();
            reduced.insert(keys::ID.into(), Value::from(id));
            return Value::Object(reduced);
        }
    }

    Value::Object(
        map.iter()
            .filter(|(key, value)| !value.is_null() && !ignored_key(key))
            .map(|(key, value)| (key.clone(), compact(value)))
            .collect(),
    )
}

fn ignored_key(key: &str) -> bool {
    key == keys::SELECTED || key == keys::DIRTY || is_transient_key(key)
}

/// Returns true if two values are equal under record semantics.
pub fn equals(a: &Value, b: &Value) -> bool {
    same(&compact(a), &compact(b))
}

/// Returns true if two record maps are equal under record semantics.
pub fn records_equal(a: &Map, b: &Map) -> bool {
    same(&compact_object(a), &compact_object(b))
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| same(value, other)))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| same(l, r))
        }
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            match (n.as_f64(), s.trim().parse::<f64>()) {
                (Some(n), Ok(s)) => n == s,
                _ => false,
            }
        }
        (Value::String(x), Value::String(y)) => x == y || same_decimal(x, y) || same_date(x, y),
        _ => a == b,
    }
}

fn same_decimal(a: &str, b: &str) -> bool {
    if !(a.contains('.') || b.contains('.')) {
        return false;
    }
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

fn same_date(a: &str, b: &str) -> bool {
    match (parse_date(a), parse_date(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Parses an ISO-8601 date or date-time string into a UTC instant.
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Returns the fields of `a` that differ from `b`.
///
/// The result always carries `id` and `version` when `a` has them. A record
/// without a positive id is returned whole.
pub fn diff(a: &Map, b: &Map) -> Map {
    let persisted = a
        .get(keys::ID)
        .and_then(Value::as_i64)
        .is_some_and(|id| id > 0);
    if !persisted {
        return a.clone();
    }

    let mut result = Map::new();
    for key in [keys::ID, keys::VERSION] {
        if let Some(value) = a.get(key) {
            result.insert(key.into(), value.clone());
        }
    }
    for (key, value) in a {
        if key == keys::ID || key == keys::VERSION || key == keys::DIRTY || is_transient_key(key)
        {
            continue;
        }
        if !equals(value, b.get(key).unwrap_or(&Value::Null)) {
            result.insert(key.clone(), value.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn id_only_relation_equals_loaded_relation() {
        assert!(equals(&json!({"id": 5}), &json!({"id": 5, "name": "Foo"})));
        assert!(!equals(
            &json!({"id": 5, "version": 1}),
            &json!({"id": 5, "version": 1, "name": "Foo"})
        ));
        assert!(!equals(&json!({"id": 5}), &json!({"id": 6})));
    }

    #[test]
    fn dirty_relation_compares_fully() {
        let dirty = json!({"id": 5, "name": "Bar", "_dirty": true});
        assert!(!equals(&dirty, &json!({"id": 5, "name": "Foo", "_dirty": true})));
    }

    #[test]
    fn ignores_transient_and_selection() {
        let a = json!({"id": -1, "name": "x", "$version": 3, "selected": true, "__tmp": 1});
        let b = json!({"id": -1, "name": "x", "note": null});
        assert!(equals(&a, &b));
    }

    #[test]
    fn loose_scalars() {
        assert!(equals(&json!(1.5), &json!("1.50")));
        assert!(equals(&json!("1.5"), &json!("1.50")));
        assert!(!equals(&json!("007"), &json!("7")));
        assert!(equals(&json!(2), &json!(2.0)));
        assert!(equals(
            &json!("2024-03-01T10:00:00Z"),
            &json!("2024-03-01T11:00:00+01:00")
        ));
        assert!(equals(&json!("2024-03-01"), &json!("2024-03-01T00:00:00")));
        assert!(!equals(&json!("2024-03-01"), &json!("2024-03-02")));
    }

    #[test]
    fn arrays_drop_nulls() {
        assert!(equals(&json!([{"id": 1}, null]), &json!([{"id": 1}])));
        assert!(!equals(&json!([{"id": 1}, {"id": 2}]), &json!([{"id": 2}, {"id": 1}])));
    }

    #[test]
    fn diff_is_minimal() {
        let a = map(json!({"id": 1, "version": 2, "name": "new", "code": "A", "$x": 1}));
        let b = map(json!({"id": 1, "version": 2, "name": "old", "code": "A"}));
        assert_eq!(
            Value::Object(diff(&a, &b)),
            json!({"id": 1, "version": 2, "name": "new"})
        );
    }

    #[test]
    fn diff_of_unsaved_record_is_whole() {
        let a = map(json!({"id": -3, "name": "x"}));
        assert_eq!(diff(&a, &a), a);
    }

    #[test]
    fn diff_includes_removed_values() {
        let a = map(json!({"id": 1, "version": 1, "note": null}));
        let b = map(json!({"id": 1, "version": 1, "note": "old"}));
        assert_eq!(diff(&a, &b).get("note"), Some(&Value::Null));
    }
}
