//! In-memory authoritative store.
//!
//! [`MemoryBackend`] implements [`Transport`] over per-model tables with
//! optimistic versioning, so store and executor tests can run full
//! round-trips without a server.

use async_trait::async_trait;
use formsync_core::{equals, CoreError, CoreResult, Transport, UploadControl};
use formsync_protocol::{
    keys, ExportResult, Map, PostRequest, PostResponse, ReadOptions, RecordKey, SearchRequest,
    SearchResponse, UploadRequest, Value,
};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::time::Duration;

/// Handler of a named remote action. Receives the action context and
/// returns the raw directive entries.
pub type ActionHandler = Box<dyn Fn(&Map) -> CoreResult<Vec<Value>> + Send + Sync>;

/// A request seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    /// Search over a model.
    Search(String),
    /// Post of the given kind.
    Post(String, &'static str),
    /// Remote action with its context.
    Action(String, Map),
    /// File upload for a field.
    Upload(String, String),
}

/// An in-memory [`Transport`] with versioned tables and scripted actions.
pub struct MemoryBackend {
    tables: RwLock<BTreeMap<String, BTreeMap<i64, Map>>>,
    next_id: AtomicI64,
    actions: RwLock<HashMap<String, ActionHandler>>,
    calls: Mutex<Vec<BackendCall>>,
    latency: Mutex<HashMap<String, Duration>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            actions: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a record, assigning an id and version 0. Returns the stored
    /// record.
    pub fn insert(&self, model: &str, mut fields: Map) -> Map {
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        fields.insert(keys::ID.into(), Value::from(id));
        fields.insert(keys::VERSION.into(), Value::from(0));
        self.tables
            .write()
            .entry(model.to_string())
            .or_default()
            .insert(id, fields.clone());
        fields
    }

    /// Returns a stored record.
    pub fn get(&self, model: &str, id: i64) -> Option<Map> {
        self.tables.read().get(model)?.get(&id).cloned()
    }

    /// Returns the number of stored records of a model.
    pub fn len(&self, model: &str) -> usize {
        self.tables.read().get(model).map_or(0, BTreeMap::len)
    }

    /// Returns true if a model has no record.
    pub fn is_empty(&self, model: &str) -> bool {
        self.len(model) == 0
    }

    /// Simulates a write by another session: applies `changes` and bumps the
    /// version.
    pub fn touch(&self, model: &str, id: i64, changes: Map) {
        let mut tables = self.tables.write();
        if let Some(stored) = tables.get_mut(model).and_then(|t| t.get_mut(&id)) {
            let version = stored.get(keys::VERSION).and_then(Value::as_i64).unwrap_or(0);
            stored.extend(changes);
            stored.insert(keys::VERSION.into(), Value::from(version + 1));
        }
    }

    /// Registers a remote action.
    pub fn on_action(
        &self,
        name: &str,
        handler: impl Fn(&Map) -> CoreResult<Vec<Value>> + Send + Sync + 'static,
    ) {
        self.actions
            .write()
            .insert(name.to_string(), Box::new(handler));
    }

    /// Delays every call of an action.
    pub fn delay_action(&self, name: &str, delay: Duration) {
        self.latency.lock().insert(name.to_string(), delay);
    }

    /// Returns every call seen so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Returns the names of the remote actions called, in order.
    pub fn action_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::Action(name, _) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the contexts an action was called with.
    pub fn contexts(&self, action: &str) -> Vec<Map> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::Action(name, context) if name == action => Some(context.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of posts of one kind.
    pub fn post_count(&self, kind: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, BackendCall::Post(_, k) if *k == kind))
            .count()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }

    fn matching(&self, model: &str, request: &SearchRequest) -> Vec<Map> {
        let tables = self.tables.read();
        let mut rows: Vec<Map> = tables
            .get(model)
            .map(|table| {
                table
                    .values()
                    .filter(|row| matches_filter(row, request))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for key in request.sort_by.iter().rev() {
            let (field, descending) = match key.strip_prefix('-') {
                Some(field) => (field, true),
                None => (key.as_str(), false),
            };
            rows.sort_by(|a, b| {
                let order = compare(a.get(field), b.get(field));
                if descending {
                    order.reverse()
                } else {
                    order
                }
            });
        }
        rows
    }

    fn fetch(&self, model: &str, id: i64, options: &ReadOptions) -> CoreResult<Map> {
        self.get(model, id)
            .map(|row| project(&row, &options.fields))
            .ok_or_else(|| CoreError::not_found(model, id))
    }

    fn save(&self, model: &str, records: &[Map]) -> CoreResult<Vec<Map>> {
        let mut tables = self.tables.write();
        let table = tables.entry(model.to_string()).or_default();

        for record in records {
            let Some(id) = record.get(keys::ID).and_then(Value::as_i64).filter(|id| *id > 0) else {
                continue;
            };
            let stored = table.get(&id).ok_or_else(|| CoreError::not_found(model, id))?;
            let expected = stored.get(keys::VERSION).and_then(Value::as_i64);
            let sent = record.get(keys::VERSION).and_then(Value::as_i64);
            if sent.is_some() && sent != expected {
                return Err(CoreError::conflict(model, id, sent));
            }
        }

        let mut saved = Vec::with_capacity(records.len());
        for record in records {
            let id = record.get(keys::ID).and_then(Value::as_i64).filter(|id| *id > 0);
            let row = match id.and_then(|id| table.get_mut(&id)) {
                Some(stored) => {
                    let version = stored.get(keys::VERSION).and_then(Value::as_i64).unwrap_or(0);
                    for (key, value) in record {
                        if key != keys::ID && key != keys::VERSION {
                            stored.insert(key.clone(), value.clone());
                        }
                    }
                    stored.insert(keys::VERSION.into(), Value::from(version + 1));
                    stored.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
                    let mut row = record.clone();
                    row.insert(keys::ID.into(), Value::from(id));
                    row.insert(keys::VERSION.into(), Value::from(0));
                    table.insert(id, row.clone());
                    row
                }
            };
            saved.push(row);
        }
        Ok(saved)
    }

    fn remove(&self, model: &str, targets: &[RecordKey]) -> CoreResult<()> {
        let mut tables = self.tables.write();
        let table = tables.entry(model.to_string()).or_default();
        for key in targets {
            let stored = table
                .get(&key.id)
                .ok_or_else(|| CoreError::not_found(model, key.id))?;
            if stored.get(keys::VERSION).and_then(Value::as_i64) != Some(key.version) {
                return Err(CoreError::conflict(model, key.id, Some(key.version)));
            }
        }
        for key in targets {
            table.remove(&key.id);
        }
        Ok(())
    }

    fn verify(&self, model: &str, record: &Map) -> CoreResult<()> {
        let Some(id) = record.get(keys::ID).and_then(Value::as_i64) else {
            return Ok(());
        };
        let stored = self
            .get(model, id)
            .ok_or_else(|| CoreError::not_found(model, id))?;
        let sent = record.get(keys::VERSION).and_then(Value::as_i64);
        if sent != stored.get(keys::VERSION).and_then(Value::as_i64) {
            return Err(CoreError::conflict(model, id, sent));
        }
        Ok(())
    }

    async fn action(&self, action: &str, context: &Map) -> CoreResult<PostResponse> {
        let delay = self.latency.lock().get(action).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let actions = self.actions.read();
        let handler = actions
            .get(action)
            .ok_or_else(|| CoreError::transport(format!("unknown action {action}")))?;
        Ok(PostResponse {
            data: handler(context)?,
            errors: None,
        })
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("models", &self.tables.read().len())
            .field("actions", &self.actions.read().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryBackend {
    async fn search(&self, model: &str, request: &SearchRequest) -> CoreResult<SearchResponse> {
        self.record(BackendCall::Search(model.to_string()));
        let rows = self.matching(model, request);
        let total = rows.len() as u64;
        let offset = request.offset.unwrap_or(0);
        let limit = request.limit.unwrap_or(u64::MAX);
        let data = rows
            .into_iter()
            .skip(offset as usize)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|row| project(&row, &request.fields))
            .collect();
        Ok(SearchResponse {
            data,
            offset,
            total,
        })
    }

    async fn post(&self, model: &str, request: &PostRequest) -> CoreResult<PostResponse> {
        match request {
            PostRequest::Action {
                action, context, ..
            } => {
                self.record(BackendCall::Action(action.clone(), context.clone()));
                return self.action(action, context).await;
            }
            other => self.record(BackendCall::Post(model.to_string(), other.kind())),
        }

        match request {
            PostRequest::Fetch { id, options } => {
                Ok(PostResponse::records([self.fetch(model, *id, options)?]))
            }
            PostRequest::Save { records, .. } => Ok(PostResponse::records(self.save(model, records)?)),
            PostRequest::Remove { records } => {
                self.remove(model, records)?;
                Ok(PostResponse::default())
            }
            PostRequest::Copy { id } => Ok(PostResponse::records([self.fetch(
                model,
                *id,
                &ReadOptions::default(),
            )?])),
            PostRequest::Export { request } => {
                let result = ExportResult {
                    export_size: self.matching(model, request).len() as u64,
                    file_name: format!("{model}.csv"),
                };
                let value = serde_json::to_value(result)
                    .map_err(|e| CoreError::transport(e.to_string()))?;
                Ok(PostResponse {
                    data: vec![value],
                    errors: None,
                })
            }
            PostRequest::Verify { record } => {
                self.verify(model, record)?;
                Ok(PostResponse::default())
            }
            PostRequest::Action { .. } => Ok(PostResponse::default()),
        }
    }

    async fn upload(
        &self,
        model: &str,
        request: &UploadRequest,
        control: &UploadControl,
    ) -> CoreResult<Map> {
        self.record(BackendCall::Upload(model.to_string(), request.field.clone()));
        control.report(50);
        let mut record = request.record.clone();
        record.insert(
            request.field.clone(),
            serde_json::json!({
                "fileName": request.file_name,
                "size": request.content.len(),
            }),
        );
        let saved = self.save(model, &[record])?;
        saved
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::invalid_record("upload saved nothing"))
    }
}

fn matches_filter(row: &Map, request: &SearchRequest) -> bool {
    let Some(filter) = &request.filter else {
        return true;
    };
    filter
        .criteria
        .iter()
        .all(|(field, expected)| row.get(field).is_some_and(|actual| equals(actual, expected)))
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn project(row: &Map, fields: &[String]) -> Map {
    if fields.is_empty() {
        return row.clone();
    }
    row.iter()
        .filter(|(key, _)| {
            key.as_str() == keys::ID || key.as_str() == keys::VERSION || fields.contains(key)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
