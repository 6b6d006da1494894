//! Error types for the fuzzy row matcher.

use thiserror::Error;

/// Result type for matcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a match
#[derive(Debug, Error)]
pub enum Error {
    /// Settings failed validation before any work started
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Schema bootstrap requested for a target vendor we have no script for
    #[error("Unsupported target vendor: {0}")]
    UnsupportedSource(String),

    /// Schema bootstrap script failed to run
    #[error("Schema bootstrap failed: {0}")]
    Bootstrap(String),

    /// Reading rows from the source failed
    #[error("Source error: {0}")]
    Source(rusqlite::Error),

    /// A batch write failed and was rolled back
    #[error("Persistence error: {0}")]
    Persistence(rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The orchestrator's wait on a task ended without a result
    #[error("Interrupted while waiting for {0}")]
    InterruptedWait(String),

    /// The run was cancelled before the producer finished
    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
