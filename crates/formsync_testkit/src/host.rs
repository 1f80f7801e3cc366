//! Scripted form host.

use async_trait::async_trait;
use formsync_engine::{FieldError, FormHost, TargetState};
use formsync_protocol::{Map, Record, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A [`FormHost`] whose answers are set up by the test and whose calls are
/// recorded.
#[derive(Debug, Default)]
pub struct ScriptedHost {
    shown: Mutex<Vec<Record>>,
    edits: Mutex<Map>,
    grid_edits: Mutex<Option<Map>>,
    defaults: Mutex<Map>,
    errors: Mutex<Vec<FieldError>>,
    veto: Mutex<Option<String>>,
    targets: Mutex<HashMap<String, TargetState>>,
    applied: Mutex<Vec<(String, Map)>>,
    signals: Mutex<Vec<(String, Option<Value>)>>,
    refreshes: AtomicUsize,
    mobile: AtomicBool,
}

impl ScriptedHost {
    /// Creates a host with no pending edit and no validation failure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an unflushed widget edit.
    pub fn edit(&self, field: &str, value: Value) {
        self.edits.lock().insert(field.to_string(), value);
    }

    /// Records an uncommitted grid edit.
    pub fn grid_edit(&self, field: &str, value: Value) {
        self.grid_edits
            .lock()
            .get_or_insert_with(Map::new)
            .insert(field.to_string(), value);
    }

    /// Sets the defaults of new records.
    pub fn set_defaults(&self, defaults: Map) {
        *self.defaults.lock() = defaults;
    }

    /// Makes validation fail for a field.
    pub fn fail_field(&self, field: &str, message: &str) {
        self.errors.lock().push(FieldError::new(field, message));
    }

    /// Clears validation failures.
    pub fn clear_failures(&self) {
        self.errors.lock().clear();
    }

    /// Makes the before-save hook veto with a message.
    pub fn veto(&self, message: &str) {
        *self.veto.lock() = Some(message.to_string());
    }

    /// Declares the state of an attribute target.
    pub fn set_target(&self, target: &str, state: TargetState) {
        self.targets.lock().insert(target.to_string(), state);
    }

    /// Marks the host as a small-screen device.
    pub fn set_mobile(&self, mobile: bool) {
        self.mobile.store(mobile, Ordering::SeqCst);
    }

    /// Returns every record displayed so far.
    pub fn shown(&self) -> Vec<Record> {
        self.shown.lock().clone()
    }

    /// Returns the last record displayed.
    pub fn last_shown(&self) -> Option<Record> {
        self.shown.lock().last().cloned()
    }

    /// Returns the widget attributes applied, in order.
    pub fn applied(&self) -> Vec<(String, Map)> {
        self.applied.lock().clone()
    }

    /// Returns the generic signals received.
    pub fn signals(&self) -> Vec<(String, Option<Value>)> {
        self.signals.lock().clone()
    }

    /// Returns the number of refreshes.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormHost for ScriptedHost {
    fn edit_record(&self, record: &Record) {
        self.shown.lock().push(record.clone());
    }

    async fn new_record(&self) -> Record {
        Record::plain(self.defaults.lock().clone())
    }

    async fn before_save(&self, _record: &Record) -> Result<(), String> {
        let veto = self.veto.lock().clone();
        match veto {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    fn validate(&self, _record: &Record) -> Vec<FieldError> {
        self.errors.lock().clone()
    }

    async fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    async fn flush(&self) -> Map {
        std::mem::take(&mut *self.edits.lock())
    }

    fn on_signal(&self, signal: &str, data: Option<&Value>) {
        self.signals
            .lock()
            .push((signal.to_string(), data.cloned()));
    }

    fn has_target(&self, target: &str) -> TargetState {
        self.targets
            .lock()
            .get(target)
            .cloned()
            .unwrap_or(TargetState::Present)
    }

    fn apply_attrs(&self, target: &str, attrs: &Map) {
        self.applied
            .lock()
            .push((target.to_string(), attrs.clone()));
    }

    async fn after_grid_edit(&self) -> Option<Map> {
        self.grid_edits.lock().take()
    }

    fn is_mobile(&self) -> bool {
        self.mobile.load(Ordering::SeqCst)
    }
}
