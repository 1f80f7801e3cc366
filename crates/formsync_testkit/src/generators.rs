//! Property-based test generators using proptest.

use formsync_protocol::{Map, Value};
use proptest::prelude::*;

/// Strategy for field names that are neither reserved nor transient.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}")
        .expect("Invalid regex")
        .prop_filter("reserved field name", |name| {
            !matches!(name.as_str(), "id" | "version" | "selected" | "cid" | "attrs")
        })
}

/// Strategy for scalar field values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::from),
        prop::string::string_regex("[a-zA-Z ]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for a reference to a persisted record, with or without a
/// version.
pub fn reference_strategy() -> impl Strategy<Value = Value> {
    (1i64..50, prop::option::of(0i64..5), scalar_strategy()).prop_map(|(id, version, name)| {
        let mut map = Map::new();
        map.insert("id".into(), Value::from(id));
        if let Some(version) = version {
            map.insert("version".into(), Value::from(version));
        }
        map.insert("name".into(), name);
        Value::Object(map)
    })
}

/// Strategy for a collection of persisted items with distinct ids.
pub fn collection_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(1i64..100, (0i64..5, scalar_strategy()), 0..5).prop_map(|items| {
        let items = items
            .into_iter()
            .map(|(id, (version, name))| {
                let mut map = Map::new();
                map.insert("id".into(), Value::from(id));
                map.insert("version".into(), Value::from(version));
                map.insert("name".into(), name);
                Value::Object(map)
            })
            .collect();
        Value::Array(items)
    })
}

/// Strategy for a field value: scalar, reference or collection.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => scalar_strategy(),
        1 => reference_strategy(),
        1 => collection_strategy(),
    ]
}

/// Strategy for a persisted record with a positive id and a version.
pub fn persisted_record_strategy() -> impl Strategy<Value = Map> {
    (
        1i64..1000,
        0i64..10,
        prop::collection::btree_map(field_name_strategy(), field_value_strategy(), 0..6),
    )
        .prop_map(|(id, version, fields)| {
            let mut map: Map = fields.into_iter().collect();
            map.insert("id".into(), Value::from(id));
            map.insert("version".into(), Value::from(version));
            map
        })
}

/// Strategy for a partial update payload over generated field names.
pub fn payload_strategy() -> impl Strategy<Value = Map> {
    prop::collection::btree_map(field_name_strategy(), field_value_strategy(), 0..6)
        .prop_map(|fields| fields.into_iter().collect())
}
