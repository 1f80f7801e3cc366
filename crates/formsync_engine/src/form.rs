//! Live form state owned by an executor.

use formsync_core::outgoing;
use formsync_protocol::{Map, Record, Value};
use std::collections::BTreeMap;

/// Record, snapshot, context cache and widget attributes of one form.
#[derive(Debug, Clone)]
pub struct FormState {
    record: Record,
    snapshot: Record,
    context: Option<Map>,
    attrs: BTreeMap<String, Map>,
    queued: BTreeMap<String, Vec<(String, Map)>>,
    needs_reload: bool,
}

impl FormState {
    /// Creates a state showing `record`.
    pub fn new(record: Record) -> Self {
        Self {
            snapshot: record.clone(),
            record,
            context: None,
            attrs: BTreeMap::new(),
            queued: BTreeMap::new(),
            needs_reload: false,
        }
    }

    /// Returns the live record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Returns the live record mutably and drops the cached context.
    pub fn record_mut(&mut self) -> &mut Record {
        self.context = None;
        &mut self.record
    }

    /// Returns the record as last loaded.
    pub fn snapshot(&self) -> &Record {
        &self.snapshot
    }

    /// Installs a freshly loaded record.
    pub fn install(&mut self, record: Record) {
        self.snapshot = record.clone();
        self.record = record;
        self.context = None;
        self.needs_reload = false;
    }

    /// Drops the cached context.
    pub fn invalidate_context(&mut self) {
        self.context = None;
    }

    /// Returns true if a cached context exists.
    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Returns the action context, recomputing it from the record when the
    /// cache was dropped. Entries of `extra` are overridden by record fields.
    pub fn context(&mut self, model: &str, extra: &Map) -> Map {
        let base = self.context.get_or_insert_with(|| {
            let mut base = outgoing(self.record.fields());
            base.insert("_model".into(), Value::String(model.to_string()));
            base
        });
        let mut context = extra.clone();
        context.extend(base.iter().map(|(k, v)| (k.clone(), v.clone())));
        context
    }

    /// Marks the record stale after a version conflict.
    pub fn require_reload(&mut self) {
        self.needs_reload = true;
    }

    /// Returns true if the record must be reloaded before saving.
    pub fn needs_reload(&self) -> bool {
        self.needs_reload
    }

    /// Returns the widget attributes applied to a target.
    pub fn attrs(&self, target: &str) -> Option<&Map> {
        self.attrs.get(target)
    }

    /// Records widget attributes for a target.
    pub fn set_attrs(&mut self, target: &str, attrs: &Map) {
        self.attrs
            .entry(target.to_string())
            .or_default()
            .extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Queues attributes for a target inside a nested view that has not
    /// loaded yet.
    pub fn queue_attrs(&mut self, view: &str, target: &str, attrs: Map) {
        self.queued
            .entry(view.to_string())
            .or_default()
            .push((target.to_string(), attrs));
    }

    /// Takes the attributes queued for a nested view.
    pub fn take_queued(&mut self, view: &str) -> Vec<(String, Map)> {
        self.queued.remove(view).unwrap_or_default()
    }

    /// Returns the number of targets queued for a nested view.
    pub fn queued_len(&self, view: &str) -> usize {
        self.queued.get(view).map_or(0, Vec::len)
    }
}

impl Default for FormState {
    fn default() -> Self {
        Self::new(Record::empty())
    }
}
