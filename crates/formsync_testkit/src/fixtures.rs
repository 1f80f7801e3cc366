//! Test fixtures wiring a store and an executor to the in-memory backend.

use crate::backend::MemoryBackend;
use crate::host::ScriptedHost;
use crate::ui::RecordingUi;
use formsync_core::{RecordStore, StoreConfig};
use formsync_engine::{ActionExecutor, EngineConfig};
use formsync_protocol::{Map, Record, Value};
use std::sync::Arc;

/// Builds a field map from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn map(value: Value) -> Map {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Builds a plain record from a JSON object literal.
pub fn record(value: Value) -> Record {
    Record::plain(map(value))
}

/// Builds a dynamic record from a JSON object literal.
pub fn dynamic_record(value: Value) -> Record {
    Record::dynamic(map(value))
}

/// A store over a fresh [`MemoryBackend`].
pub fn memory_store(model: &str) -> (Arc<MemoryBackend>, Arc<RecordStore<MemoryBackend>>) {
    memory_store_with(model, StoreConfig::default())
}

/// A configured store over a fresh [`MemoryBackend`].
pub fn memory_store_with(
    model: &str,
    config: StoreConfig,
) -> (Arc<MemoryBackend>, Arc<RecordStore<MemoryBackend>>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(RecordStore::with_config(model, Arc::clone(&backend), config));
    (backend, store)
}

/// One form wired to recording capabilities and the in-memory backend.
pub struct FormHarness {
    /// Backend holding the authoritative records.
    pub backend: Arc<MemoryBackend>,
    /// Store of the form's model.
    pub store: Arc<RecordStore<MemoryBackend>>,
    /// Recorded UI effects.
    pub ui: Arc<RecordingUi>,
    /// Scripted host.
    pub host: Arc<ScriptedHost>,
    /// Executor under test.
    pub executor: ActionExecutor<MemoryBackend>,
}

impl FormHarness {
    /// Creates a harness with the default engine configuration.
    pub fn new(model: &str) -> Self {
        Self::with_config(model, EngineConfig::default())
    }

    /// Creates a harness with an engine configuration.
    pub fn with_config(model: &str, config: EngineConfig) -> Self {
        let (backend, store) = memory_store(model);
        let ui = Arc::new(RecordingUi::new());
        let host = Arc::new(ScriptedHost::new());
        let executor = ActionExecutor::with_config(
            Arc::clone(&store),
            Arc::clone(&ui) as Arc<dyn formsync_engine::UiEffectSink>,
            Arc::clone(&host) as Arc<dyn formsync_engine::FormHost>,
            config,
        );
        Self {
            backend,
            store,
            ui,
            host,
            executor,
        }
    }

    /// Stores a record in the backend and shows it in the form.
    pub fn open(&self, fields: Value) -> Record {
        let stored = self.backend.insert(self.store.model(), map(fields));
        let record = Record::plain(stored);
        self.executor.load(record.clone());
        record
    }

    /// Registers a remote action answering with fixed directive sets.
    pub fn respond(&self, action: &str, sets: Vec<Value>) {
        self.backend.on_action(action, move |_| Ok(sets.clone()));
    }
}

impl std::fmt::Debug for FormHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormHarness")
            .field("model", &self.store.model())
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
