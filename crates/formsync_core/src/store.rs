//! Record store.
//!
//! A [`RecordStore`] runs paged searches and CRUD requests for one model and
//! owns the page cache the views render from. Every mutation updates the
//! cache under a short write lock, releases it, then emits a
//! [`StoreEvent`].

use crate::config::StoreConfig;
use crate::equality;
use crate::error::{CoreError, CoreResult};
use crate::feed::{EventFeed, StoreEvent, StoreNotification};
use crate::identity::{strip_placeholders, PlaceholderIds};
use crate::merge::{shadow_nested_versions, KnownVersions, MergeContext, RecordMerger};
use crate::transport::Transport;
use crate::upload::{outgoing, upload_request, UploadControl};
use formsync_protocol::{
    keys, ExportResult, Map, PostRequest, PostResponse, ReadOptions, Record, RecordKey, SearchFilter,
    SearchRequest, UploadRequest, Value,
};
use parking_lot::RwLock;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a search result updates the page cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreMode {
    /// Replace the cached page.
    #[default]
    Replace,
    /// Append to the cached page, replacing entries with the same id.
    Extend,
    /// Leave the cache untouched.
    Skip,
}

/// Options for [`RecordStore::search`].
///
/// Unset values fall back to the ones remembered from the previous search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Filter.
    pub filter: Option<SearchFilter>,
    /// Fields to fetch.
    pub fields: Option<Vec<String>>,
    /// Sort fields.
    pub sort_by: Option<Vec<String>>,
    /// Offset override.
    pub offset: Option<u64>,
    /// Limit override.
    pub limit: Option<u64>,
    /// Translate values.
    pub translate: bool,
    /// Cache update mode.
    pub store: StoreMode,
}

impl SearchOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter.
    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the fields to fetch.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the sort fields.
    pub fn with_sort_by<I, S>(mut self, sort_by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort_by = Some(sort_by.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the offset.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the cache update mode.
    pub fn with_mode(mut self, store: StoreMode) -> Self {
        self.store = store;
        self
    }
}

/// The visible slice of a search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    /// Offset of the first record.
    pub offset: u64,
    /// Number of cached records.
    pub size: usize,
    /// Page size.
    pub limit: u64,
    /// Total number of matching records.
    pub total: u64,
}

impl Page {
    /// Returns true if records follow this page.
    pub fn has_next(&self) -> bool {
        self.offset + (self.size as u64) < self.total
    }

    /// Returns true if records precede this page.
    pub fn has_prev(&self) -> bool {
        self.offset > 0
    }
}

/// Result of a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Returned records.
    pub records: Vec<Record>,
    /// Page after the search.
    pub page: Page,
}

#[derive(Debug)]
struct StoreState {
    filter: Option<SearchFilter>,
    fields: Vec<String>,
    sort_by: Vec<String>,
    records: Vec<Record>,
    page: Page,
}

/// CRUD and paged search over one model.
pub struct RecordStore<T: Transport + ?Sized> {
    model: String,
    transport: Arc<T>,
    config: StoreConfig,
    state: RwLock<StoreState>,
    feed: EventFeed,
    placeholders: PlaceholderIds,
}

impl<T: Transport + ?Sized> RecordStore<T> {
    /// Creates a store with the default configuration.
    pub fn new(model: impl Into<String>, transport: Arc<T>) -> Self {
        Self::with_config(model, transport, StoreConfig::default())
    }

    /// Creates a store with a configuration.
    pub fn with_config(model: impl Into<String>, transport: Arc<T>, config: StoreConfig) -> Self {
        let state = StoreState {
            filter: None,
            fields: Vec::new(),
            sort_by: Vec::new(),
            records: Vec::new(),
            page: Page {
                limit: config.default_limit,
                ..Page::default()
            },
        };
        Self {
            model: model.into(),
            transport,
            feed: EventFeed::with_max_history(config.history_limit),
            config,
            state: RwLock::new(state),
            placeholders: PlaceholderIds::new(),
        }
    }

    /// Returns the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns a snapshot of the cached records.
    pub fn records(&self) -> Vec<Record> {
        self.state.read().records.clone()
    }

    /// Returns the current page.
    pub fn page(&self) -> Page {
        self.state.read().page
    }

    /// Returns the cached record with the given id.
    pub fn get(&self, id: i64) -> Option<Record> {
        self.state
            .read()
            .records
            .iter()
            .find(|record| record.id() == Some(id))
            .cloned()
    }

    /// Returns the next placeholder id for an unsaved record.
    pub fn placeholder_id(&self) -> i64 {
        self.placeholders.next_id()
    }

    /// Returns the placeholder id source.
    pub fn placeholders(&self) -> &PlaceholderIds {
        &self.placeholders
    }

    /// Subscribes to store events.
    pub fn subscribe(&self) -> Receiver<StoreNotification> {
        self.feed.subscribe()
    }

    /// Returns the event feed.
    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    /// Runs a search and updates the cache according to `options.store`.
    pub async fn search(&self, options: SearchOptions) -> CoreResult<SearchResult> {
        let request = self.search_request(&options, true);
        let limit = request.limit.unwrap_or(self.config.default_limit);
        debug!(model = %self.model, offset = ?request.offset, limit, "search");

        let response = self.transport.search(&self.model, &request).await?;
        let mut records: Vec<Record> = Vec::with_capacity(response.data.len());
        for fields in response.data {
            upsert(&mut records, self.wrap(fields));
        }

        if options.store == StoreMode::Skip {
            let page = Page {
                offset: response.offset,
                size: records.len(),
                limit,
                total: response.total,
            };
            return Ok(SearchResult { records, page });
        }

        let page = {
            let mut state = self.state.write();
            if options.filter.is_some() {
                state.filter = options.filter.clone();
            }
            if let Some(fields) = &options.fields {
                state.fields = fields.clone();
            }
            if let Some(sort_by) = &options.sort_by {
                state.sort_by = sort_by.clone();
            }
            let offset = if options.store == StoreMode::Extend {
                for record in &records {
                    upsert(&mut state.records, record.clone());
                }
                state.page.offset
            } else {
                state.records = records.clone();
                response.offset
            };
            state.page = Page {
                offset,
                size: state.records.len(),
                limit,
                total: response.total,
            };
            state.page
        };
        self.feed.emit(StoreEvent::Change { page });
        Ok(SearchResult { records, page })
    }

    fn search_request(&self, options: &SearchOptions, paged: bool) -> SearchRequest {
        let state = self.state.read();
        let mut filter = options.filter.clone().or_else(|| state.filter.clone());
        if let Some(context) = filter.as_mut().and_then(|f| f.domain_context.as_mut()) {
            shadow_nested_versions(context);
        }
        let limit = if state.page.limit > 0 {
            state.page.limit
        } else {
            self.config.default_limit
        };
        SearchRequest {
            offset: paged.then(|| options.offset.unwrap_or(state.page.offset)),
            limit: paged.then(|| options.limit.unwrap_or(limit)),
            sort_by: options
                .sort_by
                .clone()
                .unwrap_or_else(|| state.sort_by.clone()),
            fields: options
                .fields
                .clone()
                .unwrap_or_else(|| state.fields.clone()),
            filter,
            translate: options.translate,
        }
    }

    /// Fetches one record.
    ///
    /// A cached copy is refreshed in place, keeping its key set.
    pub async fn read(&self, id: i64, options: &ReadOptions) -> CoreResult<Record> {
        let request = PostRequest::Fetch {
            id,
            options: options.clone(),
        };
        let fetched = self
            .transport
            .post(&self.model, &request)
            .await?
            .first_record()
            .ok_or_else(|| CoreError::not_found(&self.model, id))?;

        let refreshed = {
            let mut state = self.state.write();
            let cached = state.records.iter_mut().find(|r| r.id() == Some(id));
            match cached {
                Some(cached) => {
                    refresh_cached(cached.fields_mut(), &fetched);
                    Some(state.page)
                }
                None => None,
            }
        };
        if let Some(page) = refreshed {
            self.feed.emit(StoreEvent::Change { page });
        }
        Ok(self.wrap(fetched))
    }

    /// Creates or updates a record.
    pub async fn save(&self, record: &Record) -> CoreResult<Record> {
        self.save_with(record, &UploadControl::new()).await
    }

    /// Creates or updates a record, routing `$upload` records through the
    /// upload path with progress and cancellation.
    pub async fn save_with(&self, record: &Record, control: &UploadControl) -> CoreResult<Record> {
        let saved = match upload_request(record)? {
            Some(mut request) => {
                strip_placeholders(&mut request.record);
                self.upload(&request, control).await?
            }
            None => {
                let mut payload = outgoing(record.fields());
                strip_placeholders(&mut payload);
                info!(model = %self.model, id = ?record.id(), "saving record");
                let request = PostRequest::Save {
                    records: vec![payload],
                    options: ReadOptions::default(),
                };
                self.post_write(&request)
                    .await?
                    .first_record()
                    .ok_or_else(|| CoreError::invalid_record("save returned no record"))?
            }
        };

        self.accept_one(saved.clone());
        self.feed.emit(StoreEvent::Saved {
            records: vec![saved.clone()],
        });
        Ok(match record {
            Record::Dynamic(_) => Record::Dynamic(saved),
            Record::Plain(_) => Record::Plain(saved),
        })
    }

    async fn upload(&self, request: &UploadRequest, control: &UploadControl) -> CoreResult<Map> {
        if control.is_cancelled() {
            return Err(CoreError::UploadCancelled);
        }
        info!(
            model = %self.model,
            field = %request.field,
            file = %request.file_name,
            size = request.content.len(),
            "uploading"
        );
        let result = tokio::select! {
            biased;
            _ = control.cancelled() => Err(CoreError::UploadCancelled),
            result = self.transport.upload(&self.model, request, control) => result,
        };
        if let Err(CoreError::UploadCancelled) = &result {
            warn!(model = %self.model, field = %request.field, "upload cancelled");
        }
        let saved = result?;
        if self.config.upload_progress {
            control.report(100);
        }
        Ok(saved)
    }

    /// Writes several records; the returned records replace the page.
    pub async fn save_all(&self, records: &[Record]) -> CoreResult<Vec<Record>> {
        let payload = records
            .iter()
            .map(|record| {
                let mut fields = outgoing(record.fields());
                strip_placeholders(&mut fields);
                fields
            })
            .collect();
        info!(model = %self.model, count = records.len(), "saving records");
        let request = PostRequest::Save {
            records: payload,
            options: ReadOptions::default(),
        };
        let saved = self.post_write(&request).await?.into_records();

        let page = {
            let mut state = self.state.write();
            state.records = saved.iter().cloned().map(|m| self.wrap(m)).collect();
            state.page.size = state.records.len();
            state.page.total = state.page.total.max(state.records.len() as u64);
            state.page
        };
        self.feed.emit(StoreEvent::Change { page });
        self.feed.emit(StoreEvent::Saved {
            records: saved.clone(),
        });
        Ok(saved.into_iter().map(|m| self.wrap(m)).collect())
    }

    /// Deletes a record.
    pub async fn remove(&self, record: &Record) -> CoreResult<()> {
        self.remove_all(std::slice::from_ref(record)).await.map(|_| ())
    }

    /// Deletes records by id and version, returning the number deleted.
    ///
    /// A stale version fails with [`CoreError::Conflict`] and leaves the
    /// cache untouched.
    pub async fn remove_all(&self, records: &[Record]) -> CoreResult<usize> {
        let targets = records
            .iter()
            .map(|record| match (record.id(), record.version()) {
                (Some(id), Some(version)) if id > 0 => Ok(RecordKey { id, version }),
                _ => Err(CoreError::invalid_record(
                    "only persisted records with a version can be removed",
                )),
            })
            .collect::<CoreResult<Vec<_>>>()?;
        if targets.is_empty() {
            return Ok(0);
        }

        info!(model = %self.model, count = targets.len(), "removing records");
        let request = PostRequest::Remove {
            records: targets.clone(),
        };
        self.post_write(&request).await?;

        let page = {
            let mut state = self.state.write();
            state
                .records
                .retain(|record| !targets.iter().any(|key| record.id() == Some(key.id)));
            state.page.size = state.records.len();
            state.page.total = state.page.total.saturating_sub(targets.len() as u64);
            state.page
        };
        let count = targets.len();
        self.feed.emit(StoreEvent::Change { page });
        self.feed.emit(StoreEvent::Removed { keys: targets });
        Ok(count)
    }

    async fn post_write(&self, request: &PostRequest) -> CoreResult<PostResponse> {
        match self.transport.post(&self.model, request).await {
            Err(err) if err.is_conflict() => {
                warn!(model = %self.model, kind = request.kind(), "stale version rejected");
                Err(err)
            }
            other => other,
        }
    }

    /// Fetches an unsaved copy of a record.
    pub async fn copy(&self, id: i64) -> CoreResult<Record> {
        let mut copy = self
            .transport
            .post(&self.model, &PostRequest::Copy { id })
            .await?
            .first_record()
            .ok_or_else(|| CoreError::not_found(&self.model, id))?;
        copy.remove(keys::ID);
        copy.remove(keys::VERSION);
        Ok(self.wrap(copy))
    }

    /// Requests an export of the records matching a search.
    pub async fn export(&self, options: SearchOptions) -> CoreResult<ExportResult> {
        let request = self.search_request(&options, false);
        let response = self
            .transport
            .post(&self.model, &PostRequest::Export { request })
            .await?;
        Ok(response.into_export_result()?)
    }

    /// Checks that a record version is still current.
    ///
    /// Returns `Ok(false)` when the server reports a newer version.
    pub async fn verify(&self, record: &Record) -> CoreResult<bool> {
        let mut identity = Map::new();
        for key in [keys::ID, keys::VERSION] {
            if let Some(value) = record.get(key) {
                identity.insert(key.into(), value.clone());
            }
        }
        match self
            .transport
            .post(&self.model, &PostRequest::Verify { record: identity })
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_conflict() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Structural equality of two records.
    pub fn equals(&self, a: &Record, b: &Record) -> bool {
        equality::records_equal(a.fields(), b.fields())
    }

    /// Fields of `a` that differ from `b`, always with `id` and `version`.
    pub fn diff(&self, a: &Record, b: &Record) -> Map {
        equality::diff(a.fields(), b.fields())
    }

    /// Merges a payload into a live record using the cache as the source of
    /// known versions. Deferred nested values raise
    /// [`StoreEvent::PendingNested`].
    pub fn merge_into(&self, dest: &mut Record, payload: &Map) -> bool {
        let mut ctx = MergeContext::new();
        let changed = RecordMerger::new(self).update_values(dest, payload, &mut ctx);
        if !ctx.deferred.is_empty() {
            debug!(model = %self.model, paths = ?ctx.deferred, "deferred nested values");
            self.feed.emit(StoreEvent::PendingNested {
                paths: ctx.deferred,
            });
        }
        changed
    }

    fn accept_one(&self, saved: Map) {
        let page = {
            let mut state = self.state.write();
            let id = saved.get(keys::ID).and_then(Value::as_i64);
            let position = id.and_then(|id| state.records.iter().position(|r| r.id() == Some(id)));
            match position {
                Some(position) => {
                    let cached = state.records[position].fields_mut();
                    replace_preserving(cached, saved);
                }
                None => {
                    let record = self.wrap(saved);
                    state.records.push(record);
                    state.page.total += 1;
                }
            }
            state.page.size = state.records.len();
            state.page
        };
        self.feed.emit(StoreEvent::Change { page });
    }

    fn wrap(&self, fields: Map) -> Record {
        if self.config.dynamic {
            Record::Dynamic(fields)
        } else {
            Record::Plain(fields)
        }
    }
}

impl<T: Transport + ?Sized> KnownVersions for RecordStore<T> {
    fn latest_version(&self, id: i64) -> Option<i64> {
        self.state
            .read()
            .records
            .iter()
            .filter(|record| record.id() == Some(id))
            .filter_map(Record::version)
            .max()
    }
}

impl<T: Transport + ?Sized> std::fmt::Debug for RecordStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("model", &self.model)
            .field("page", &self.page())
            .finish_non_exhaustive()
    }
}

fn upsert(records: &mut Vec<Record>, record: Record) {
    let existing = record
        .id()
        .and_then(|id| records.iter().position(|r| r.id() == Some(id)));
    match existing {
        Some(position) => records[position] = record,
        None => records.push(record),
    }
}

fn lookup<'a>(fields: &'a Map, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn refresh_cached(cached: &mut Map, fetched: &Map) {
    let cached_keys: Vec<String> = cached.keys().cloned().collect();
    for key in cached_keys {
        let value = if key.contains('.') {
            lookup(fetched, &key)
        } else {
            fetched.get(&key)
        };
        if let Some(value) = value {
            cached.insert(key, value.clone());
        }
    }
}

fn replace_preserving(cached: &mut Map, saved: Map) {
    let previous = std::mem::replace(cached, saved);
    for (key, value) in previous {
        if cached.contains_key(&key) || key == keys::DIRTY {
            continue;
        }
        let value = if key.contains('.') {
            lookup(cached, &key).cloned().unwrap_or(value)
        } else {
            value
        };
        cached.insert(key, value);
    }
}
