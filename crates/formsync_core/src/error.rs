//! Error types for the record store.

use formsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for store operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Network or server failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Status code reported by the transport, if any.
        status: Option<u16>,
    },

    /// The record no longer resolves server-side.
    #[error("record {id} not found in {model}")]
    NotFound {
        /// Model name.
        model: String,
        /// Record id.
        id: i64,
    },

    /// Stale version on write or delete.
    #[error("record {id} in {model} was modified by another session")]
    Conflict {
        /// Model name.
        model: String,
        /// Record id.
        id: i64,
        /// Version sent by the client.
        version: Option<i64>,
    },

    /// Upload was cancelled before completion.
    #[error("upload cancelled")]
    UploadCancelled,

    /// Malformed payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Record cannot be used for the requested operation.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a transport error without status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a transport error with a status code.
    pub fn transport_status(message: impl Into<String>, status: u16) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Creates a not found error.
    pub fn not_found(model: impl Into<String>, id: i64) -> Self {
        Self::NotFound {
            model: model.into(),
            id,
        }
    }

    /// Creates a conflict error.
    pub fn conflict(model: impl Into<String>, id: i64, version: Option<i64>) -> Self {
        Self::Conflict {
            model: model.into(),
            id,
            version,
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Returns true for stale-version errors.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict { .. })
    }

    /// Returns true for network or server failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, CoreError::Transport { .. })
    }

    /// Returns the message shown to the user for this error.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Transport { .. } => "The server could not be reached. Please retry.".into(),
            CoreError::Conflict { .. } => {
                "The record has been updated or deleted by another action. Please reload.".into()
            }
            other => other.to_string(),
        }
    }
}
