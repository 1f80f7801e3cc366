//! Configuration for the record store.

/// Configuration for a [`RecordStore`](crate::RecordStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Page size used when a search gives no limit.
    pub default_limit: u64,
    /// Number of store events kept for polling.
    pub history_limit: usize,
    /// Report completion to the upload progress callback.
    pub upload_progress: bool,
    /// Produce dynamic records.
    pub dynamic: bool,
}

impl StoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            default_limit: 40,
            history_limit: 1000,
            upload_progress: true,
            dynamic: false,
        }
    }

    /// Sets the default page size.
    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.default_limit = limit;
        self
    }

    /// Sets the event history limit.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Enables or disables upload progress reporting.
    pub fn with_upload_progress(mut self, enabled: bool) -> Self {
        self.upload_progress = enabled;
        self
    }

    /// Makes the store produce dynamic records.
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
