//! Placeholder identities for unsaved records.
//!
//! Unsaved collection members get negative ids from a decreasing counter so
//! they can be matched before the server assigns a real id. Placeholders are
//! stripped before a record is written upstream.

use formsync_protocol::{keys, Map, Record, Value};
use std::sync::atomic::{AtomicI64, Ordering};

/// Decreasing counter of negative placeholder ids.
#[derive(Debug)]
pub struct PlaceholderIds {
    next: AtomicI64,
}

impl PlaceholderIds {
    /// Creates a counter starting at `-1`.
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(-1),
        }
    }

    /// Returns the next placeholder id.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_sub(1, Ordering::Relaxed)
    }

    /// Assigns a placeholder id to a record without id.
    ///
    /// Returns the id the record carries afterwards.
    pub fn assign(&self, record: &mut Record) -> i64 {
        if let Some(id) = record.id() {
            return id;
        }
        let id = self.next_id();
        record.set(keys::ID, Value::from(id));
        id
    }

    /// Assigns placeholder ids to collection item values without id.
    pub fn assign_items(&self, items: &mut [Value]) {
        for item in items.iter_mut() {
            if let Value::Object(map) = item {
                if map.get(keys::ID).map_or(true, Value::is_null) {
                    map.insert(keys::ID.into(), Value::from(self.next_id()));
                }
            }
        }
    }
}

impl Default for PlaceholderIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes non-positive ids at every nesting level.
pub fn strip_placeholders(fields: &mut Map) {
    let placeholder = fields
        .get(keys::ID)
        .and_then(Value::as_i64)
        .is_some_and(|id| id <= 0);
    if placeholder {
        fields.remove(keys::ID);
    }
    for value in fields.values_mut() {
        strip_value(value);
    }
}

fn strip_value(value: &mut Value) {
    match value {
        Value::Object(map) => strip_placeholders(map),
        Value::Array(items) => items.iter_mut().for_each(strip_value),
        _ => {}
    }
}
