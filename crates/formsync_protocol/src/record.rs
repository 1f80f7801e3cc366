//! Record model.
//!
//! A record is a JSON object keyed by field name. Two flavours exist:
//! plain records whose fields are literal model fields, and dynamic
//! (schema-less) records whose free-form attributes live in an `attrs`
//! blob next to `id` and `version`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// JSON value used for record fields.
pub type Value = serde_json::Value;

/// JSON object used as the record field map.
pub type Map = serde_json::Map<String, Value>;

/// Reserved record keys.
pub mod keys {
    /// Record identity.
    pub const ID: &str = "id";
    /// Optimistic-concurrency counter.
    pub const VERSION: &str = "version";
    /// Shadow key holding the version of a nested relation.
    pub const SHADOW_VERSION: &str = "$version";
    /// Local dirty marker.
    pub const DIRTY: &str = "_dirty";
    /// Collection selection flag.
    pub const SELECTED: &str = "selected";
    /// Deferred values for a nested record that is not fully loaded.
    pub const PENDING_VALUES: &str = "$updatedValues";
    /// Binary upload marker.
    pub const UPLOAD: &str = "$upload";
    /// Payload flag forcing the destination dirty after a merge.
    pub const FORCE_DIRTY: &str = "_forceDirty";
    /// Client id of an unsaved collection item.
    pub const CLIENT_ID: &str = "cid";
    /// Attribute blob of a dynamic record.
    pub const ATTRS: &str = "attrs";
    /// Attachment counter maintained by report directives.
    pub const ATTACHMENTS: &str = "$attachments";
}

/// Returns true if the key names a transient field.
///
/// Transient fields start with `$` or `__` in any dotted segment. They never
/// take part in equality and are never sent upstream as meaningful changes.
pub fn is_transient_key(key: &str) -> bool {
    key.split('.')
        .any(|part| part.starts_with('$') || part.starts_with("__"))
}

/// Returns the numeric `id` of a record value, if any.
pub fn id_of(value: &Value) -> Option<i64> {
    value.get(keys::ID).and_then(Value::as_i64)
}

/// Returns the numeric `version` of a record value, if any.
pub fn version_of(value: &Value) -> Option<i64> {
    value.get(keys::VERSION).and_then(Value::as_i64)
}

/// A business record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Record with literal model fields.
    Plain(Map),
    /// Schema-less record whose attributes live in the `attrs` blob.
    Dynamic(Map),
}

impl Record {
    /// Creates a plain record.
    pub fn plain(fields: Map) -> Self {
        Record::Plain(fields)
    }

    /// Creates a dynamic record.
    pub fn dynamic(fields: Map) -> Self {
        Record::Dynamic(fields)
    }

    /// Creates an empty plain record.
    pub fn empty() -> Self {
        Record::Plain(Map::new())
    }

    /// Builds a plain record from a JSON value.
    ///
    /// Returns `None` unless the value is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Record::Plain(map)),
            _ => None,
        }
    }

    /// Returns true for dynamic records.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Record::Dynamic(_))
    }

    /// Returns the field map.
    pub fn fields(&self) -> &Map {
        match self {
            Record::Plain(map) | Record::Dynamic(map) => map,
        }
    }

    /// Returns the mutable field map.
    pub fn fields_mut(&mut self) -> &mut Map {
        match self {
            Record::Plain(map) | Record::Dynamic(map) => map,
        }
    }

    /// Consumes the record and returns its field map.
    pub fn into_fields(self) -> Map {
        match self {
            Record::Plain(map) | Record::Dynamic(map) => map,
        }
    }

    /// Returns the record as a JSON object value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields().clone())
    }

    /// Returns a field value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields().get(key)
    }

    /// Sets a field value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields_mut().insert(key.into(), value)
    }

    /// Removes a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields_mut().remove(key)
    }

    /// Returns the record id.
    pub fn id(&self) -> Option<i64> {
        self.fields().get(keys::ID).and_then(Value::as_i64)
    }

    /// Returns the record version.
    pub fn version(&self) -> Option<i64> {
        self.fields().get(keys::VERSION).and_then(Value::as_i64)
    }

    /// Returns true if the record has never been persisted.
    pub fn is_new(&self) -> bool {
        self.id().map_or(true, |id| id <= 0)
    }

    /// Returns true if the record carries the local dirty marker.
    pub fn is_dirty(&self) -> bool {
        self.fields()
            .get(keys::DIRTY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Sets or clears the local dirty marker.
    pub fn set_dirty(&mut self, dirty: bool) {
        if dirty {
            self.set(keys::DIRTY, Value::Bool(true));
        } else {
            self.remove(keys::DIRTY);
        }
    }

    /// Returns true if the record has at least one non-transient,
    /// non-null field other than `id` and `version`.
    pub fn has_content(&self) -> bool {
        self.fields().iter().any(|(key, value)| {
            key != keys::ID
                && key != keys::VERSION
                && key != keys::DIRTY
                && !is_transient_key(key)
                && !value.is_null()
        })
    }

    /// Returns the decoded attribute map of a dynamic record.
    ///
    /// The blob may be stored either as an object or as JSON text. Missing
    /// or unparsable blobs yield an empty map.
    pub fn attrs(&self) -> Map {
        match self.fields().get(keys::ATTRS) {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }

    /// Stores the attribute map, keeping the representation already in use.
    pub fn set_attrs(&mut self, attrs: Map) {
        let as_text = matches!(self.fields().get(keys::ATTRS), Some(Value::String(_)));
        let value = if as_text {
            Value::String(Value::Object(attrs).to_string())
        } else {
            Value::Object(attrs)
        };
        self.set(keys::ATTRS, value);
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Map> for Record {
    fn from(map: Map) -> Self {
        Record::Plain(map)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Record::Plain)
    }
}
