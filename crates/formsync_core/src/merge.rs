//! Recursive record merging.
//!
//! [`RecordMerger`] folds a partial update payload into a live record in
//! place. Nested records are matched by identity, collections are matched
//! item by item, and optimistic-concurrency metadata is never downgraded.

use crate::equality::equals;
use formsync_protocol::{id_of, keys, Map, Record, Value};
use std::collections::HashMap;
use tracing::debug;

/// Source of the latest versions seen for record ids.
pub trait KnownVersions {
    /// Returns the latest known version of the record with the given id.
    fn latest_version(&self, id: i64) -> Option<i64>;
}

/// A known-versions source that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKnownVersions;

impl KnownVersions for NoKnownVersions {
    fn latest_version(&self, _id: i64) -> Option<i64> {
        None
    }
}

impl KnownVersions for Vec<Map> {
    fn latest_version(&self, id: i64) -> Option<i64> {
        self.iter()
            .filter(|item| item.get(keys::ID).and_then(Value::as_i64) == Some(id))
            .filter_map(|item| item.get(keys::VERSION).and_then(Value::as_i64))
            .max()
    }
}

impl KnownVersions for Vec<Record> {
    fn latest_version(&self, id: i64) -> Option<i64> {
        self.iter()
            .filter(|record| record.id() == Some(id))
            .filter_map(Record::version)
            .max()
    }
}

impl KnownVersions for HashMap<i64, i64> {
    fn latest_version(&self, id: i64) -> Option<i64> {
        self.get(&id).copied()
    }
}

/// Side results of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeContext {
    /// Paths of nested records whose values were stashed under
    /// `$updatedValues` because the nested record is not loaded yet.
    pub deferred: Vec<String>,
}

impl MergeContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Delta {
    changed: bool,
    dirty: bool,
}

impl Delta {
    const NONE: Delta = Delta {
        changed: false,
        dirty: false,
    };
    const DIRTY: Delta = Delta {
        changed: true,
        dirty: true,
    };
    const CLEAN: Delta = Delta {
        changed: true,
        dirty: false,
    };

    fn add(&mut self, other: Delta) {
        self.changed |= other.changed;
        self.dirty |= other.dirty;
    }
}

/// Merges partial payloads into live records.
pub struct RecordMerger<'a> {
    known: &'a dyn KnownVersions,
}

impl<'a> RecordMerger<'a> {
    /// Creates a merger backed by a known-versions source.
    pub fn new(known: &'a dyn KnownVersions) -> Self {
        Self { known }
    }

    /// Merges `payload` into `dest`, returning true if anything changed.
    ///
    /// Changes other than selection flags, versions and transient keys mark
    /// the destination `_dirty`. A `_forceDirty` payload always does.
    pub fn update_values(&self, dest: &mut Record, payload: &Map, ctx: &mut MergeContext) -> bool {
        let delta = match dest {
            Record::Plain(fields) => self.merge_object(fields, payload, ctx, ""),
            Record::Dynamic(_) => self.merge_dynamic(dest, payload, ctx),
        };
        delta.changed
    }

    fn merge_dynamic(&self, dest: &mut Record, payload: &Map, ctx: &mut MergeContext) -> Delta {
        let mut identity = Map::new();
        let mut attributes = Map::new();
        for (key, value) in payload {
            if key == keys::ID || key == keys::VERSION || key == keys::FORCE_DIRTY {
                identity.insert(key.clone(), value.clone());
            } else {
                attributes.insert(key.clone(), value.clone());
            }
        }

        let mut attrs = dest.attrs();
        let mut delta = self.merge_fields(&mut attrs, &attributes, ctx, "");
        if delta.changed {
            dest.set_attrs(attrs);
        }
        if delta.dirty {
            dest.set_dirty(true);
        }
        delta.add(self.merge_object(dest.fields_mut(), &identity, ctx, ""));
        delta
    }

    fn merge_object(&self, dest: &mut Map, payload: &Map, ctx: &mut MergeContext, path: &str) -> Delta {
        let mut delta = self.merge_fields(dest, payload, ctx, path);

        let forced = payload
            .get(keys::FORCE_DIRTY)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if (delta.dirty || forced) && dest.get(keys::DIRTY) != Some(&Value::Bool(true)) {
            dest.insert(keys::DIRTY.into(), Value::Bool(true));
            delta.add(Delta::DIRTY);
        }

        delta.add(self.backfill_version(dest));
        delta
    }

    fn backfill_version(&self, dest: &mut Map) -> Delta {
        let Some(id) = dest.get(keys::ID).and_then(Value::as_i64).filter(|id| *id > 0) else {
            return Delta::NONE;
        };
        let Some(current) = dest.get(keys::VERSION).and_then(Value::as_i64) else {
            return Delta::NONE;
        };
        match self.known.latest_version(id) {
            Some(latest) if latest > current => {
                dest.insert(keys::VERSION.into(), Value::from(latest));
                Delta::CLEAN
            }
            _ => Delta::NONE,
        }
    }

    fn merge_fields(&self, dest: &mut Map, payload: &Map, ctx: &mut MergeContext, path: &str) -> Delta {
        let mut delta = Delta::NONE;
        for (key, value) in payload {
            if key.is_empty()
                || key == keys::SELECTED
                || key == keys::DIRTY
                || key == keys::FORCE_DIRTY
            {
                continue;
            }
            let field_path = join(path, key);
            if key.starts_with('$') {
                delta.add(set_if_changed(dest, key, value, Delta::CLEAN));
            } else if key.contains('.') {
                delta.add(set_dotted(dest, key, value));
            } else if key == keys::VERSION {
                delta.add(bump_version(dest, value));
            } else {
                delta.add(self.merge_field(dest, key, value, ctx, &field_path));
            }
        }
        delta
    }

    fn merge_field(
        &self,
        dest: &mut Map,
        key: &str,
        incoming: &Value,
        ctx: &mut MergeContext,
        path: &str,
    ) -> Delta {
        match (dest.get_mut(key), incoming) {
            (Some(Value::Array(current)), Value::Array(items)) => {
                let (merged, delta) = self.merge_collection(current, items, ctx, path);
                if delta.changed {
                    *current = merged;
                }
                delta
            }
            (Some(Value::Object(current)), Value::Object(next))
                if same_identity(current, next) =>
            {
                if current.get(keys::VERSION).is_some_and(Value::is_number) {
                    self.merge_object(current, next, ctx, path)
                } else {
                    stash(current, next, ctx, path)
                }
            }
            _ => {
                let replacement = shadow_version(incoming.clone());
                set_if_changed(dest, key, &replacement, Delta::DIRTY)
            }
        }
    }

    fn merge_collection(
        &self,
        current: &[Value],
        incoming: &[Value],
        ctx: &mut MergeContext,
        path: &str,
    ) -> (Vec<Value>, Delta) {
        let mut used = vec![false; current.len()];
        let mut merged = Vec::with_capacity(incoming.len());
        let mut delta = Delta::NONE;
        let mut matched = 0usize;

        for (index, item) in incoming.iter().enumerate() {
            let Value::Object(next) = item else {
                merged.push(item.clone());
                continue;
            };
            let next = promote_client_id(next);
            let found = find_match(current, &used, &next);
            match found {
                Some(position) => {
                    used[position] = true;
                    matched += 1;
                    let mut target = match &current[position] {
                        Value::Object(map) => map.clone(),
                        _ => Map::new(),
                    };
                    let item_path = format!("{path}[{index}]");
                    delta.add(self.merge_object(&mut target, &next, ctx, &item_path));
                    if let Some(selected) = next.get(keys::SELECTED) {
                        if target.get(keys::SELECTED) != Some(selected) {
                            target.insert(keys::SELECTED.into(), selected.clone());
                            delta.add(Delta::CLEAN);
                        }
                    }
                    merged.push(Value::Object(target));
                }
                None => {
                    delta.add(Delta::DIRTY);
                    merged.push(Value::Object(next));
                }
            }
        }

        if matched < current.len() {
            delta.add(Delta::DIRTY);
        } else if !delta.changed && merged.as_slice() != current {
            delta.add(Delta::CLEAN);
        }
        (merged, delta)
    }
}

/// Merges `payload` into `dest` using a known-versions source.
///
/// Returns true if anything changed.
pub fn update_values(dest: &mut Record, payload: &Map, known: &dyn KnownVersions) -> bool {
    let mut ctx = MergeContext::new();
    let changed = RecordMerger::new(known).update_values(dest, payload, &mut ctx);
    if !ctx.deferred.is_empty() {
        debug!(paths = ?ctx.deferred, "deferred nested values");
    }
    changed
}

/// Renames `version` to `$version` on a nested record value that carries an
/// id and a numeric version.
pub fn shadow_version(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            let has_id = map.get(keys::ID).is_some_and(|id| !id.is_null());
            if has_id && map.get(keys::VERSION).is_some_and(Value::is_number) {
                if let Some(version) = map.remove(keys::VERSION) {
                    map.insert(keys::SHADOW_VERSION.into(), version);
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

/// Shadows the versions of every nested record in a field map.
///
/// Top-level `id`/`version` are kept; nested relations and collection
/// items have their `version` renamed to `$version`.
pub fn shadow_nested_versions(fields: &mut Map) {
    for value in fields.values_mut() {
        match value {
            Value::Object(_) => *value = shadow_version(value.take()),
            Value::Array(items) => {
                for item in items.iter_mut() {
                    *item = shadow_version(item.take());
                }
            }
            _ => {}
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn same_identity(current: &Map, next: &Map) -> bool {
    let current_id = current.get(keys::ID).and_then(Value::as_i64);
    let next_id = next.get(keys::ID).and_then(Value::as_i64);
    current_id.is_some() && current_id == next_id
}

fn set_if_changed(dest: &mut Map, key: &str, value: &Value, kind: Delta) -> Delta {
    let unchanged = match dest.get(key) {
        Some(current) => equals(current, value) && current.is_null() == value.is_null(),
        None => value.is_null(),
    };
    if unchanged {
        return Delta::NONE;
    }
    dest.insert(key.to_string(), value.clone());
    kind
}

fn set_dotted(dest: &mut Map, key: &str, value: &Value) -> Delta {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(last) = parts.pop() else {
        return Delta::NONE;
    };
    if last.is_empty() || parts.iter().any(|part| part.is_empty()) {
        return Delta::NONE;
    }
    let mut target = dest;
    for part in parts {
        match target.get_mut(part) {
            Some(Value::Object(next)) => target = next,
            _ => return Delta::NONE,
        }
    }
    set_if_changed(target, last, value, Delta::DIRTY)
}

fn bump_version(dest: &mut Map, incoming: &Value) -> Delta {
    let Some(next) = incoming.as_i64() else {
        return Delta::NONE;
    };
    match dest.get(keys::VERSION).and_then(Value::as_i64) {
        Some(current) if current >= next => Delta::NONE,
        _ => {
            dest.insert(keys::VERSION.into(), Value::from(next));
            Delta::CLEAN
        }
    }
}

fn stash(current: &mut Map, next: &Map, ctx: &mut MergeContext, path: &str) -> Delta {
    if already_applied(current, next) {
        return Delta::NONE;
    }
    let mut pending = match current.get(keys::PENDING_VALUES) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    let before = pending.clone();
    for (key, value) in next {
        pending.insert(key.clone(), value.clone());
    }
    if pending == before && current.contains_key(keys::PENDING_VALUES) {
        return Delta::NONE;
    }
    current.insert(keys::PENDING_VALUES.into(), Value::Object(pending));
    ctx.deferred.push(path.to_string());
    Delta::CLEAN
}

fn already_applied(current: &Map, next: &Map) -> bool {
    next.iter().all(|(key, value)| {
        let existing = if key == keys::VERSION {
            current
                .get(keys::VERSION)
                .or_else(|| current.get(keys::SHADOW_VERSION))
        } else {
            current.get(key)
        };
        match existing {
            Some(existing) => equals(existing, value),
            None => value.is_null(),
        }
    })
}

fn promote_client_id(item: &Map) -> Map {
    let mut item = item.clone();
    let id_missing = item.get(keys::ID).map_or(true, Value::is_null);
    if id_missing {
        if let Some(cid) = item.remove(keys::CLIENT_ID) {
            item.insert(keys::ID.into(), cid);
        }
    }
    item
}

fn find_match(current: &[Value], used: &[bool], next: &Map) -> Option<usize> {
    let next_value = Value::Object(next.clone());
    match id_of(&next_value) {
        Some(id) => current
            .iter()
            .enumerate()
            .position(|(i, item)| !used[i] && id_of(item) == Some(id)),
        None => current
            .iter()
            .enumerate()
            .position(|(i, item)| !used[i] && equals(item, &next_value)),
    }
}
