//! Error types for the Potluck sync engine
//!
//! This module contains the error taxonomy surfaced by loads, sends, edits and
//! deletes, plus the nested validation and transport errors that the
//! collaborator traits report.

use crate::sync::StateTransitionError;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Input or invariant violations detected before or while touching the store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Message has no content and no recipe attachment")]
    EmptyMessage,
    #[error("Message content too long: {length} characters (max: {max})")]
    ContentTooLong { length: usize, max: usize },
    #[error("Cannot send a message to yourself")]
    SelfTarget,
    #[error("Conversation must have two distinct participants")]
    InvalidParticipants,
    #[error("Message belongs to conversation {actual}, store is bound to {expected}")]
    ConversationMismatch { expected: String, actual: String },
    #[error("Store is not bound to a conversation")]
    Unbound,
    #[error("Message {message_id} has not been persisted yet")]
    StillPending { message_id: String },
}

/// Failures of the backing store, live feed or other remote collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("Subscription closed: {reason}")]
    SubscriptionClosed { reason: String },
    #[error("Operation task failed: {reason}")]
    TaskFailed { reason: String },
}

/// Coarse classification matching the engine's error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Validation,
    Transport,
    TimedOut,
    Superseded,
    Internal,
}

// ----------------------------------------------------------------------------
// Sync Error
// ----------------------------------------------------------------------------

/// Core error type for the Potluck sync engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Operation timed out after {duration_ms}ms")]
    TimedOut { duration_ms: u64 },

    /// A newer load attempt started before this one completed
    #[error("Load attempt {attempt} superseded by attempt {latest}")]
    Superseded { attempt: u64, latest: u64 },

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl SyncError {
    /// Create a not-found error for a conversation
    pub fn conversation_not_found<T: Into<String>>(id: T) -> Self {
        SyncError::NotFound {
            entity: "Conversation",
            id: id.into(),
        }
    }

    /// Create a not-found error for a message
    pub fn message_not_found<T: Into<String>>(id: T) -> Self {
        SyncError::NotFound {
            entity: "Message",
            id: id.into(),
        }
    }

    /// Create a forbidden error with a reason
    pub fn forbidden<T: Into<String>>(reason: T) -> Self {
        SyncError::Forbidden {
            reason: reason.into(),
        }
    }

    /// Create a transport request failure for a named operation
    pub fn request_failed<O: Into<String>, R: Into<String>>(operation: O, reason: R) -> Self {
        SyncError::Transport(TransportError::RequestFailed {
            operation: operation.into(),
            reason: reason.into(),
        })
    }

    /// Create a backend unavailable error
    pub fn unavailable<T: Into<String>>(reason: T) -> Self {
        SyncError::Transport(TransportError::Unavailable {
            reason: reason.into(),
        })
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        SyncError::Configuration {
            reason: reason.into(),
        }
    }

    /// Classify this error into the engine taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::Forbidden { .. } => ErrorKind::Forbidden,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::TimedOut { .. } => ErrorKind::TimedOut,
            SyncError::Superseded { .. } => ErrorKind::Superseded,
            SyncError::StateTransition(_) | SyncError::Configuration { .. } => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same operation later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::TimedOut | ErrorKind::Superseded
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type SyncResult<T> = core::result::Result<T, SyncError>;
