//! Error types for action chains.

use formsync_core::CoreError;
use thiserror::Error;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors that settle an action chain as rejected.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Misplaced reserved token.
    #[error("invalid action chain: {message}")]
    Syntax {
        /// Description of the problem.
        message: String,
    },

    /// Field-level validation failed.
    #[error("invalid fields: {}", .fields.join(", "))]
    Validation {
        /// Names of the invalid fields.
        fields: Vec<String>,
    },

    /// The user declined a confirmation.
    #[error("declined by user")]
    Declined,

    /// A before-save hook vetoed the save.
    #[error("save vetoed: {message}")]
    Vetoed {
        /// Veto message.
        message: String,
    },

    /// A response directive rejected the chain.
    #[error("rejected by action response: {message}")]
    Rejected {
        /// Message of the rejecting directive.
        message: String,
    },

    /// A previous save hit a stale version; the record must be reloaded.
    #[error("record must be reloaded before saving")]
    ConflictPending,

    /// The chain was cancelled.
    #[error("chain cancelled")]
    Cancelled,

    /// Store or transport failure.
    #[error(transparent)]
    Store(#[from] CoreError),
}

impl ChainError {
    /// Creates a syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    /// Creates a directive rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates a veto error.
    pub fn vetoed(message: impl Into<String>) -> Self {
        Self::Vetoed {
            message: message.into(),
        }
    }

    /// Returns true for stale-version failures.
    pub fn is_conflict(&self) -> bool {
        match self {
            ChainError::ConflictPending => true,
            ChainError::Store(err) => err.is_conflict(),
            _ => false,
        }
    }

    /// Returns the message to show the user, if the rejection has not been
    /// shown already.
    ///
    /// Validation failures return `None`; their notice is configured on the
    /// engine.
    pub fn user_message(&self) -> Option<String> {
        match self {
            ChainError::Syntax { message } => Some(message.clone()),
            ChainError::Vetoed { message } if !message.trim().is_empty() => {
                Some(message.clone())
            }
            ChainError::ConflictPending => Some(self.to_string()),
            ChainError::Store(err) => Some(err.user_message()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_detection() {
        assert!(ChainError::ConflictPending.is_conflict());
        assert!(ChainError::from(CoreError::conflict("Order", 1, Some(2))).is_conflict());
        assert!(!ChainError::Declined.is_conflict());
    }

    #[test]
    fn user_messages() {
        assert_eq!(
            ChainError::syntax("bad").user_message(),
            Some("bad".to_string())
        );
        assert_eq!(ChainError::vetoed(" ").user_message(), None);
        assert_eq!(ChainError::Declined.user_message(), None);
        assert_eq!(ChainError::rejected("shown").user_message(), None);
        assert!(ChainError::from(CoreError::transport("down"))
            .user_message()
            .unwrap()
            .contains("retry"));
    }

    #[test]
    fn validation_display() {
        let err = ChainError::Validation {
            fields: vec!["name".into(), "code".into()],
        };
        assert_eq!(err.to_string(), "invalid fields: name, code");
    }
}
