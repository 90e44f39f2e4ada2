//! Error types for the talksync engine.

use thiserror::Error;

use crate::ports::RoomApiError;

/// Errors that can occur in engine operations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Room token missing")]
    TokenMissing,

    #[error("Editor session not found: {0}")]
    SessionNotFound(String),

    #[error("Editor reference carries no usable window or dialog id")]
    EditorRefMissing,

    #[error("Editor integration error: {0}")]
    Editor(String),

    #[error("Calendar write-back failed: {0}")]
    Calendar(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Remote room API error: {0}")]
    Api(#[from] RoomApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;
