//! Binary upload support.
//!
//! A record routes to the upload path when it carries the `$upload` marker:
//!
//! ```json
//! { "$upload": { "field": "content", "fileName": "scan.pdf", "content": "<base64>" } }
//! ```

use crate::error::{CoreError, CoreResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use formsync_protocol::{is_transient_key, keys, Map, Record, UploadRequest, Value};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::Notify;

/// Progress callback receiving a completion percentage.
pub type ProgressFn = Box<dyn Fn(u8) + Send + Sync>;

/// Progress reporting and cancellation for one upload.
pub struct UploadControl {
    cancelled: AtomicBool,
    notify: Notify,
    progress: Option<ProgressFn>,
    last: AtomicU8,
}

impl UploadControl {
    /// Creates a control without progress reporting.
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            progress: None,
            last: AtomicU8::new(0),
        }
    }

    /// Creates a control reporting progress to the given callback.
    pub fn with_progress(progress: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            progress: Some(Box::new(progress)),
            ..Self::new()
        }
    }

    /// Cancels the upload.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the upload is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Reports progress from the transport.
    ///
    /// Values are clamped to 100 and never go backwards.
    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            if let Some(progress) = &self.progress {
                progress(percent);
            }
        }
    }

    /// Returns the last reported progress.
    pub fn progress(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for UploadControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UploadControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadControl")
            .field("cancelled", &self.is_cancelled())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

/// Builds the upload marker value for a file.
pub fn upload_marker(field: &str, file_name: &str, content: &[u8]) -> Value {
    serde_json::json!({
        "field": field,
        "fileName": file_name,
        "content": STANDARD.encode(content),
    })
}

/// Extracts an upload request from a record carrying the `$upload` marker.
///
/// Returns `Ok(None)` for records without the marker.
pub fn upload_request(record: &Record) -> CoreResult<Option<UploadRequest>> {
    let Some(marker) = record.get(keys::UPLOAD) else {
        return Ok(None);
    };
    let field = marker
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid_record("upload marker without field"))?;
    let file_name = marker
        .get("fileName")
        .and_then(Value::as_str)
        .unwrap_or(field);
    let encoded = marker
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid_record("upload marker without content"))?;
    let content = STANDARD
        .decode(encoded)
        .map_err(|e| CoreError::invalid_record(format!("upload content is not base64: {e}")))?;

    Ok(Some(UploadRequest {
        record: outgoing(record.fields()),
        field: field.to_string(),
        file_name: file_name.to_string(),
        content: Bytes::from(content),
    }))
}

/// Strips transient keys and dirty markers before a record goes upstream.
pub fn outgoing(fields: &Map) -> Map {
    fields
        .iter()
        .filter(|(key, _)| !is_transient_key(key) && key.as_str() != keys::DIRTY)
        .map(|(key, value)| (key.clone(), outgoing_value(value)))
        .collect()
}

fn outgoing_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(outgoing(map)),
        Value::Array(items) => Value::Array(items.iter().map(outgoing_value).collect()),
        other => other.clone(),
    }
}
