//! Error types for depotsync-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the depotsync-core library
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

    /// The shared storage directory is not reachable
    #[error("shared storage is not reachable: {}", path.display())]
    SharedStorageUnavailable { path: PathBuf },

    /// The master database is absent and auto-create is disabled
    #[error("master database not found at {} (auto-create is disabled)", path.display())]
    MasterMissing { path: PathBuf },

    /// Another user/machine holds the master lock
    #[error("database is locked by {holder}")]
    LockDenied { holder: String },

    /// Pulling the master database to the local working copy failed
    #[error("failed to copy master database to local copy: {0}")]
    CopyDown(String),

    /// Pushing the local working copy to the master failed
    #[error("failed to copy local database to master: {0}")]
    CopyUp(String),

    /// The store has no implementation for this operation
    #[error("operation not supported by this store: {0}")]
    UnsupportedOperation(String),

    /// Operation parameters were missing or malformed
    #[error("invalid parameters for {operation}: {message}")]
    InvalidParams { operation: String, message: String },

    /// The background sync worker is no longer running
    #[error("sync worker has stopped")]
    WorkerStopped,
}

/// Result type alias for depotsync-core
pub type Result<T> = std::result::Result<T, Error>;
