//! Action chain executor.
//!
//! Each invocation runs as a small state machine:
//!
//! ```text
//! Idle ──parse──▶ Chained ──steps exhausted──▶ Settled(Resolved)
//!                    │
//!                    └──rejection──────────────▶ Settled(Rejected)
//! ```
//!
//! Reserved steps are resolved locally; every other step is one remote
//! action call whose directive sets go through the
//! [`ResponseInterpreter`](crate::ResponseInterpreter). The only state shared
//! between invocations is the [`ChainTracker`] and the form itself.

use crate::chain::{ActionChain, ChainStep};
use crate::config::EngineConfig;
use crate::effects::{Download, FormHost, TargetState, UiEffectSink};
use crate::error::{ChainError, ChainResult};
use crate::form::FormState;
use crate::interpreter::{Flow, ResponseInterpreter};
use crate::tracker::ChainTracker;
use formsync_core::{CoreError, RecordStore, Transport};
use formsync_protocol::{
    id_of, keys, ActionResponse, Map, Message, PostRequest, ReadOptions, Record, Value,
    ViewDescriptor,
};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a chain settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every step completed.
    Resolved,
    /// A step rejected the chain.
    Rejected,
}

/// State of the form's chains.
///
/// `Chained` while any chain is in flight, otherwise how the most recently
/// settled chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No chain has run yet.
    Idle,
    /// A chain is running.
    Chained,
    /// The chain settled.
    Settled(ChainOutcome),
}

impl ChainState {
    /// Returns true while a chain is running.
    pub fn is_active(&self) -> bool {
        matches!(self, ChainState::Chained)
    }
}

/// Options for one chain invocation.
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    /// Wait until every in-flight chain has settled before starting.
    pub wait_for_pending: bool,
    /// Extra context entries sent with each remote action.
    pub context: Map,
}

impl ActionOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `wait_for_pending`.
    pub fn with_wait_for_pending(mut self, wait: bool) -> Self {
        self.wait_for_pending = wait;
        self
    }

    /// Adds a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// Runs action chains against one form.
pub struct ActionExecutor<T: Transport + ?Sized> {
    store: Arc<RecordStore<T>>,
    ui: Arc<dyn UiEffectSink>,
    host: Arc<dyn FormHost>,
    config: EngineConfig,
    tracker: ChainTracker,
    form: Mutex<FormState>,
    settled: RwLock<ChainState>,
    generation: AtomicU64,
    tab_refresh: AtomicBool,
}

impl<T: Transport + ?Sized> ActionExecutor<T> {
    /// Creates an executor with the default configuration.
    pub fn new(
        store: Arc<RecordStore<T>>,
        ui: Arc<dyn UiEffectSink>,
        host: Arc<dyn FormHost>,
    ) -> Self {
        Self::with_config(store, ui, host, EngineConfig::default())
    }

    /// Creates an executor with a configuration.
    pub fn with_config(
        store: Arc<RecordStore<T>>,
        ui: Arc<dyn UiEffectSink>,
        host: Arc<dyn FormHost>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ui,
            host,
            config,
            tracker: ChainTracker::new(),
            form: Mutex::new(FormState::default()),
            settled: RwLock::new(ChainState::Idle),
            generation: AtomicU64::new(0),
            tab_refresh: AtomicBool::new(false),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<RecordStore<T>> {
        &self.store
    }

    /// Returns the in-flight chain tracker.
    pub fn tracker(&self) -> &ChainTracker {
        &self.tracker
    }

    /// Returns [`ChainState::Chained`] while any chain is in flight, the
    /// outcome of the last settled chain otherwise.
    pub fn state(&self) -> ChainState {
        if self.tracker.in_flight() > 0 {
            return ChainState::Chained;
        }
        *self.settled.read()
    }

    /// Returns the live record.
    pub fn record(&self) -> Record {
        self.form.lock().record().clone()
    }

    /// Returns a snapshot of the form state.
    pub fn form(&self) -> FormState {
        self.form.lock().clone()
    }

    /// Shows a loaded record.
    pub fn load(&self, record: Record) {
        self.install(record);
    }

    /// Cancels every running chain at its next step.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn ui(&self) -> &dyn UiEffectSink {
        self.ui.as_ref()
    }

    pub(crate) fn host(&self) -> &dyn FormHost {
        self.host.as_ref()
    }

    fn default_options(&self) -> ActionOptions {
        ActionOptions::new().with_wait_for_pending(self.config.wait_for_pending)
    }

    /// Runs the chain of the form's load event.
    pub async fn on_load(&self, chain: &str) -> ChainResult<()> {
        self.handle(chain, self.default_options()).await
    }

    /// Runs the chain of the form's new-record event.
    pub async fn on_new(&self, chain: &str) -> ChainResult<()> {
        self.handle(chain, self.default_options()).await
    }

    /// Runs the chain of the form's save event.
    pub async fn on_save(&self, chain: &str) -> ChainResult<()> {
        self.handle(chain, self.default_options()).await
    }

    /// Runs the chain of a field's change event.
    pub async fn on_change(&self, field: &str, chain: &str) -> ChainResult<()> {
        let options = self
            .default_options()
            .with_context("_source", Value::String(field.to_string()));
        self.handle(chain, options).await
    }

    /// Runs the chain of a button click, asking for confirmation first when a
    /// prompt is given.
    pub async fn on_click(&self, button: &str, chain: &str, prompt: Option<&str>) -> ChainResult<()> {
        if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
            if !self.ui.show_confirm(&Message::new(prompt)).await {
                debug!(button, "click declined");
                return self.settle(chain, Err(ChainError::Declined)).await;
            }
        }
        let options = self
            .default_options()
            .with_context("_signal", Value::String(button.to_string()))
            .with_wait_for_pending(true);
        self.handle(chain, options).await
    }

    /// Runs the chain of a selection event.
    pub async fn on_select(&self, chain: &str) -> ChainResult<()> {
        self.handle(chain, self.default_options()).await
    }

    /// Runs the chain of a tab selection event.
    pub async fn on_tab_select(&self, tab: &str, chain: &str) -> ChainResult<()> {
        let options = self
            .default_options()
            .with_context("_source", Value::String(tab.to_string()));
        self.handle(chain, options).await
    }

    /// Runs a chain to completion.
    ///
    /// Rejections carrying a user message are shown through the UI sink
    /// once, then returned.
    pub async fn handle(&self, chain: &str, options: ActionOptions) -> ChainResult<()> {
        let result = self.execute(chain, &options).await;
        self.settle(chain, result).await
    }

    async fn execute(&self, text: &str, options: &ActionOptions) -> ChainResult<()> {
        let chain = ActionChain::parse(text)?;
        if chain.is_empty() {
            return Ok(());
        }
        if options.wait_for_pending {
            self.tracker.wait_idle().await;
        }
        let _guard = self.tracker.enter();
        let generation = self.generation.load(Ordering::SeqCst);
        info!(chain = %chain, "chain started");
        self.run(chain.into_steps(), &options.context, generation)
            .await
            .map(|_| ())
    }

    async fn settle(&self, chain: &str, result: ChainResult<()>) -> ChainResult<()> {
        let outcome = if result.is_ok() {
            ChainOutcome::Resolved
        } else {
            ChainOutcome::Rejected
        };
        *self.settled.write() = ChainState::Settled(outcome);

        match &result {
            Ok(()) => info!(chain, "chain resolved"),
            Err(err) => warn!(chain, error = %err, "chain rejected"),
        }
        if self.tab_refresh.swap(false, Ordering::SeqCst) {
            self.ui.refresh_tab();
        }
        if let Err(err) = &result {
            if self.config.surface_errors {
                if let Some(message) = self.rejection_message(err) {
                    self.ui.show_error(&Message::new(message)).await;
                }
            }
        }
        result
    }

    fn rejection_message(&self, err: &ChainError) -> Option<String> {
        match err {
            ChainError::Validation { .. } => Some(self.config.validation_notice.clone()),
            other => other.user_message(),
        }
    }

    fn check_cancelled(&self, generation: u64) -> ChainResult<()> {
        if self.generation.load(Ordering::SeqCst) != generation {
            Err(ChainError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn run<'a>(
        &'a self,
        steps: Vec<ChainStep>,
        context: &'a Map,
        generation: u64,
    ) -> BoxFuture<'a, ChainResult<Flow>> {
        Box::pin(async move {
            let mut queue: VecDeque<ChainStep> = steps.into();
            while let Some(step) = queue.pop_front() {
                self.check_cancelled(generation)?;
                debug!(step = step.token(), "running step");
                match step {
                    ChainStep::Sync => self.sync().await,
                    ChainStep::Validate => self.save_pipeline(true).await?,
                    ChainStep::Save => self.save_pipeline(false).await?,
                    ChainStep::New => self.new_record().await,
                    ChainStep::Close => self.ui.close_view(),
                    ChainStep::Action(name) => {
                        let response = self.call(&name, context).await?;
                        self.check_cancelled(generation)?;
                        let interpreter = ResponseInterpreter::new(self, context, generation);
                        for set in response.sets {
                            if interpreter.apply(set).await? == Flow::Halt {
                                return Ok(Flow::Halt);
                            }
                        }
                    }
                }
            }
            Ok(Flow::Continue)
        })
    }

    /// Runs a follow-up chain named by a directive.
    pub(crate) fn run_nested<'a>(
        &'a self,
        text: &str,
        context: &'a Map,
        generation: u64,
    ) -> BoxFuture<'a, ChainResult<Flow>> {
        match ActionChain::parse(text) {
            Ok(chain) => {
                debug!(chain = %chain, "running follow-up");
                self.run(chain.into_steps(), context, generation)
            }
            Err(err) => Box::pin(futures::future::ready(Err(err))),
        }
    }

    async fn call(&self, action: &str, extra: &Map) -> ChainResult<ActionResponse> {
        let model = self.store.model().to_string();
        let context = self.form.lock().context(&model, extra);
        let request = PostRequest::Action {
            action: action.to_string(),
            model: model.clone(),
            context,
        };
        debug!(action, model = %model, "calling remote action");
        let response = self
            .store
            .transport()
            .post(&model, &request)
            .await?
            .into_action_response()
            .map_err(CoreError::from)?;
        Ok(if self.config.collapse_responses {
            response.collapse()
        } else {
            response
        })
    }

    async fn sync(&self) {
        let edits = self.host.flush().await;
        let mut form = self.form.lock();
        if !edits.is_empty() {
            self.store.merge_into(form.record_mut(), &edits);
        }
        form.invalidate_context();
        debug!(edits = edits.len(), "context synced");
    }

    fn install(&self, record: Record) {
        self.form.lock().install(record.clone());
        self.host.edit_record(&record);
    }

    pub(crate) async fn new_record(&self) {
        let record = self.host.new_record().await;
        debug!("installing new record");
        self.install(record);
    }

    /// Re-reads the record from the store and shows it.
    pub async fn reload(&self) -> ChainResult<()> {
        let id = self.form.lock().record().id().filter(|id| *id > 0);
        if let Some(id) = id {
            let fresh = self.store.read(id, &ReadOptions::default()).await?;
            self.install(fresh);
            info!(id, "record reloaded");
        }
        self.host.refresh().await;
        Ok(())
    }

    /// Runs the save pipeline.
    pub async fn save(&self) -> ChainResult<()> {
        self.save_pipeline(false).await
    }

    /// Runs field validation only.
    pub async fn validate(&self) -> ChainResult<()> {
        self.save_pipeline(true).await
    }

    pub(crate) async fn save_pipeline(&self, validate_only: bool) -> ChainResult<()> {
        let record = self.record();
        if validate_only {
            return self.check_fields(&record);
        }

        self.host
            .before_save(&record)
            .await
            .map_err(ChainError::vetoed)?;

        let fresh = record.is_new() && record.has_content();
        if !record.is_dirty() && !fresh {
            debug!(id = ?record.id(), "record already saved");
            return Ok(());
        }
        if self.form.lock().needs_reload() {
            return Err(ChainError::ConflictPending);
        }
        self.check_fields(&record)?;

        let snapshot = self.form.lock().snapshot().clone();
        let mut fields = self.store.diff(&record, &snapshot);
        if let Some(upload) = record.get(keys::UPLOAD) {
            fields.insert(keys::UPLOAD.into(), upload.clone());
        }
        let payload = match &record {
            Record::Dynamic(_) => Record::Dynamic(fields),
            Record::Plain(_) => Record::Plain(fields),
        };

        let saved = match self.store.save(&payload).await {
            Ok(saved) => saved,
            Err(err) => {
                if err.is_conflict() {
                    warn!(id = ?record.id(), "save conflict, reload required");
                    self.form.lock().require_reload();
                }
                return Err(err.into());
            }
        };
        let id = saved
            .id()
            .ok_or_else(|| CoreError::invalid_record("saved record has no id"))?;
        let fresh = self.store.read(id, &ReadOptions::default()).await?;
        self.install(fresh);
        info!(id, "record saved");
        Ok(())
    }

    fn check_fields(&self, record: &Record) -> ChainResult<()> {
        let errors = self.host.validate(record);
        if errors.is_empty() {
            return Ok(());
        }
        for error in &errors {
            self.ui.mark_field_invalid(&error.field, &error.message);
        }
        Err(ChainError::Validation {
            fields: errors.into_iter().map(|e| e.field).collect(),
        })
    }

    /// Merges a value patch into the live record and drops the context.
    pub(crate) fn merge_values(&self, values: &Map) -> bool {
        let (changed, record) = {
            let mut form = self.form.lock();
            let changed = self.store.merge_into(form.record_mut(), values);
            (changed, form.record().clone())
        };
        if changed {
            debug!(fields = values.len(), "values merged");
            self.host.edit_record(&record);
        }
        changed
    }

    pub(crate) fn schedule_tab_refresh(&self) {
        self.tab_refresh.store(true, Ordering::SeqCst);
    }

    pub(crate) fn bump_attachments(&self) {
        let mut form = self.form.lock();
        let record = form.record_mut();
        let count = record
            .get(keys::ATTACHMENTS)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        record.set(keys::ATTACHMENTS, Value::from(count + 1));
    }

    /// Opens a view, downloading instead when an html view asks for it.
    pub(crate) fn open_view(&self, view: &ViewDescriptor) {
        let download = view.view_type.as_deref() == Some("html")
            && view.params.get("download").and_then(Value::as_bool) == Some(true);
        match (download, view.resource.as_deref()) {
            (true, Some(url)) => self.ui.download(&Download {
                url: url.to_string(),
                file_name: view
                    .params
                    .get("fileName")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            _ => self.ui.open_view(view),
        }
    }

    /// Applies the attribute changes of one target.
    pub(crate) async fn apply_attrs(&self, target: &str, attrs: &Map) -> ChainResult<()> {
        let mut widget = Map::new();
        for (name, value) in attrs {
            match name.as_str() {
                "value" | "value:set" => {
                    let mut patch = Map::new();
                    patch.insert(target.to_string(), value.clone());
                    self.merge_values(&patch);
                }
                "value:add" => self.add_items(target, value),
                "value:del" => self.remove_items(target, value),
                "refresh" if target.is_empty() => self.reload().await?,
                _ => {
                    widget.insert(name.clone(), value.clone());
                }
            }
        }
        if widget.is_empty() {
            return Ok(());
        }

        match self.host.has_target(target) {
            TargetState::Present => {
                self.form.lock().set_attrs(target, &widget);
                self.host.apply_attrs(target, &widget);
            }
            TargetState::Unloaded { view } => {
                debug!(target, view = %view, "queueing attrs until view loads");
                self.form.lock().queue_attrs(&view, target, widget);
            }
            TargetState::Unknown => debug!(target, "ignoring attrs of unknown target"),
        }
        Ok(())
    }

    /// Applies the attributes queued for a nested view that just loaded.
    pub fn nested_view_loaded(&self, view: &str) {
        let queued = self.form.lock().take_queued(view);
        for (target, attrs) in queued {
            self.form.lock().set_attrs(&target, &attrs);
            self.host.apply_attrs(&target, &attrs);
        }
    }

    fn add_items(&self, target: &str, value: &Value) {
        let mut items = match value {
            Value::Array(items) => items.clone(),
            Value::Object(_) => vec![value.clone()],
            _ => return,
        };
        self.store.placeholders().assign_items(&mut items);

        let record = {
            let mut form = self.form.lock();
            let record = form.record_mut();
            let mut current = match record.get(target) {
                Some(Value::Array(current)) => current.clone(),
                _ => Vec::new(),
            };
            let before = current.len();
            for item in items {
                let id = id_of(&item);
                if !current.iter().any(|c| id.is_some() && id_of(c) == id) {
                    current.push(item);
                }
            }
            if current.len() == before {
                return;
            }
            record.set(target, Value::Array(current));
            record.set_dirty(true);
            record.clone()
        };
        self.host.edit_record(&record);
    }

    fn remove_items(&self, target: &str, value: &Value) {
        let ids: Vec<i64> = match value {
            Value::Array(items) => items.iter().filter_map(item_id).collect(),
            other => item_id(other).into_iter().collect(),
        };
        if ids.is_empty() {
            return;
        }

        let record = {
            let mut form = self.form.lock();
            let record = form.record_mut();
            let Some(Value::Array(current)) = record.get(target) else {
                return;
            };
            let kept: Vec<Value> = current
                .iter()
                .filter(|item| !id_of(item).is_some_and(|id| ids.contains(&id)))
                .cloned()
                .collect();
            if kept.len() == current.len() {
                return;
            }
            record.set(target, Value::Array(kept));
            record.set_dirty(true);
            record.clone()
        };
        self.host.edit_record(&record);
    }
}

fn item_id(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| id_of(value))
}

impl<T: Transport + ?Sized> std::fmt::Debug for ActionExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("model", &self.store.model())
            .field("state", &self.state())
            .field("in_flight", &self.tracker.in_flight())
            .finish_non_exhaustive()
    }
}
