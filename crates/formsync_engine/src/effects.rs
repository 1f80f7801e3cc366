//! Capabilities the engine drives: UI effects and the hosting form.

use async_trait::async_trait;
use formsync_protocol::{Map, Message, Record, Value, ViewDescriptor};
use futures::future::BoxFuture;

/// Resolves when the user dismisses a message.
pub type Dismissal = BoxFuture<'static, ()>;

/// A file offered for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Resource path relative to the application root.
    pub url: String,
    /// Suggested file name.
    pub file_name: Option<String>,
}

impl Download {
    /// Download of an exported data file.
    pub fn export(file_name: &str) -> Self {
        Self {
            url: format!("ws/files/data-export/{file_name}"),
            file_name: Some(file_name.to_string()),
        }
    }

    /// Download of a stored attachment.
    pub fn attachment(id: i64, file_name: &str) -> Self {
        Self {
            url: format!("ws/rest/com.axelor.meta.db.MetaFile/{id}/content/download"),
            file_name: Some(file_name.to_string()),
        }
    }

    /// Download of a generated report.
    pub fn report(link: &str, file_name: Option<&str>) -> Self {
        Self {
            url: report_url(link, file_name),
            file_name: file_name.map(str::to_string),
        }
    }
}

pub(crate) fn report_url(link: &str, file_name: Option<&str>) -> String {
    format!("ws/files/report?link={link}&name={}", file_name.unwrap_or(link))
}

/// User-visible side effects.
#[async_trait]
pub trait UiEffectSink: Send + Sync {
    /// Shows a dismissible message.
    fn show_info(&self, message: &Message) -> Dismissal;

    /// Shows a non-blocking toast.
    fn notify(&self, message: &Message);

    /// Shows a blocking error and resolves once it is dismissed.
    async fn show_error(&self, message: &Message);

    /// Asks for confirmation.
    async fn show_confirm(&self, message: &Message) -> bool;

    /// Attaches an inline error marker to a field. A blank message clears it.
    fn mark_field_invalid(&self, field: &str, message: &str);

    /// Opens a view.
    fn open_view(&self, view: &ViewDescriptor);

    /// Closes the current view.
    fn close_view(&self);

    /// Starts a download.
    fn download(&self, download: &Download);

    /// Reloads the whole application.
    fn reload_app(&self);

    /// Reloads the current tab.
    fn refresh_tab(&self);
}

/// A field validation failure reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field name.
    pub field: String,
    /// Error message.
    pub message: String,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Whether an attribute target is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    /// The widget exists.
    Present,
    /// The widget lives in a nested view that has not loaded yet.
    Unloaded {
        /// Name of the nested view.
        view: String,
    },
    /// No such widget.
    Unknown,
}

/// The form hosting an executor.
#[async_trait]
pub trait FormHost: Send + Sync {
    /// Displays a record.
    fn edit_record(&self, record: &Record);

    /// Returns a blank record with defaults applied.
    async fn new_record(&self) -> Record {
        Record::empty()
    }

    /// Called before a save; an `Err` vetoes it with a message.
    async fn before_save(&self, _record: &Record) -> Result<(), String> {
        Ok(())
    }

    /// Returns field validation failures.
    fn validate(&self, _record: &Record) -> Vec<FieldError> {
        Vec::new()
    }

    /// Called after the record has been reloaded.
    async fn refresh(&self) {}

    /// Flushes pending widget edits, returning them as a value patch.
    async fn flush(&self) -> Map {
        Map::new()
    }

    /// Receives a generic signal.
    fn on_signal(&self, _signal: &str, _data: Option<&Value>) {}

    /// Resolves an attribute target.
    fn has_target(&self, _target: &str) -> TargetState {
        TargetState::Present
    }

    /// Applies widget attributes to a target.
    fn apply_attrs(&self, _target: &str, _attrs: &Map) {}

    /// Commits pending inline grid edits before a save, returning the values
    /// they changed. `None` when the host has no editable grid.
    async fn after_grid_edit(&self) -> Option<Map> {
        None
    }

    /// Returns true on small-screen devices.
    fn is_mobile(&self) -> bool {
        false
    }
}
