//! Application layer errors

use thiserror::Error;

use crate::domain::entities::MessageId;

/// Top-level service errors
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound(e.to_string()),
            ref other if other.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) => {
                StorageError::ConstraintViolation(other.to_string())
            }
            other => StorageError::Unavailable(other.to_string()),
        }
    }
}

/// Identity collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Session expired")]
    Expired,

    #[error("Unknown user: {0}")]
    UnknownUser(u64),

    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

/// Physical connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Connection reset: {0}")]
    Reset(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Per-recipient delivery errors; never surfaced to the sender
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Recipient queue full")]
    QueueFull,

    #[error("Recipient did not accept within the wait bound")]
    TimedOut,

    #[error("Recipient connection closed")]
    Closed,
}

/// Fan-out failures reported back to the sender
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FanoutError {
    #[error("Failed to persist message: {0}")]
    PersistFailed(StorageError),

    #[error("Message {message_id} saved but participants could not be resolved: {source}")]
    ResolveFailed {
        message_id: MessageId,
        source: StorageError,
    },
}

impl FanoutError {
    /// Text sent to the sender in an `error` event
    pub fn client_message(&self) -> &'static str {
        match self {
            FanoutError::PersistFailed(_) => "failed to add message to chat",
            FanoutError::ResolveFailed { .. } => "message saved but failed to get chat users",
        }
    }
}

/// Conversation directory errors, surfaced verbatim from collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
