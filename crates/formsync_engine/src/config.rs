//! Configuration for the action executor.

use formsync_protocol::{REFRESH_APP, REFRESH_TAB};

/// Configuration for an [`ActionExecutor`](crate::ActionExecutor).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Collapse attrs and values of a response before interpreting it.
    pub collapse_responses: bool,
    /// Default `wait_for_pending` for the entry points.
    pub wait_for_pending: bool,
    /// Show rejection messages through the UI sink.
    pub surface_errors: bool,
    /// Message shown when field validation rejects a chain.
    pub validation_notice: String,
    /// Signal name forcing a full application reload.
    pub refresh_app_signal: String,
    /// Signal name scheduling a tab reload.
    pub refresh_tab_signal: String,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            collapse_responses: true,
            wait_for_pending: false,
            surface_errors: true,
            validation_notice: "Please correct the invalid form values.".into(),
            refresh_app_signal: REFRESH_APP.into(),
            refresh_tab_signal: REFRESH_TAB.into(),
        }
    }

    /// Enables or disables response collapsing.
    pub fn with_collapse_responses(mut self, enabled: bool) -> Self {
        self.collapse_responses = enabled;
        self
    }

    /// Sets the default `wait_for_pending`.
    pub fn with_wait_for_pending(mut self, wait: bool) -> Self {
        self.wait_for_pending = wait;
        self
    }

    /// Enables or disables surfacing of rejection messages.
    pub fn with_surface_errors(mut self, enabled: bool) -> Self {
        self.surface_errors = enabled;
        self
    }

    /// Sets the validation notice.
    pub fn with_validation_notice(mut self, notice: impl Into<String>) -> Self {
        self.validation_notice = notice.into();
        self
    }

    /// Sets the reload signal names.
    pub fn with_refresh_signals(
        mut self,
        app: impl Into<String>,
        tab: impl Into<String>,
    ) -> Self {
        self.refresh_app_signal = app.into();
        self.refresh_tab_signal = tab.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
