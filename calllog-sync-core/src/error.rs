//! Error types for calllog-sync-core

use thiserror::Error;

/// Main error type for the calllog-sync-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Endpoint URL rejected at input time
    #[error("{0}")]
    InvalidEndpoint(String),

    /// The call history store refused access
    #[error("permission denied to read call logs: {0}")]
    PermissionDenied(String),

    /// Call-log source could not be read or parsed
    #[error("call log error: {0}")]
    CallLog(String),

    /// Delivery client error (not a classified delivery outcome)
    #[error("delivery error: {0}")]
    Delivery(String),

    /// A delivery worker already holds the queue
    #[error("a delivery worker is already running for this queue")]
    WorkerBusy,
}

/// Result type alias for calllog-sync-core
pub type Result<T> = std::result::Result<T, Error>;
