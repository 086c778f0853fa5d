//! Error types for Harbor.
//!
//! One taxonomy covers both scan-time errors (returned synchronously to the
//! caller) and task-time errors (funneled into a task's terminal state with a
//! concise message).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Harbor operations.
#[derive(Debug, Error)]
pub enum HarborError {
    // Remote repository errors
    #[error("Repository not found: {repo_id}")]
    RepoNotFound { repo_id: String },

    #[error("Access denied to {repo_id} (check your access token)")]
    AccessDenied { repo_id: String },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Fetch failed for {url}: {message}")]
    FetchFailed { url: String, message: String },

    // Request validation errors
    #[error("Invalid request for {field}: {message}")]
    InvalidRequest { field: String, message: String },

    // Task errors
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Merge errors
    #[error("Incomplete shard set: expected {expected} shards, found {found}")]
    IncompleteShardSet { expected: usize, found: usize },

    #[error("Tensor name collision across shards: {tensor}")]
    TensorNameCollision { tensor: String },

    #[error("Invalid shard container {path}: {message}")]
    InvalidContainer { path: PathBuf, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for Harbor operations.
pub type Result<T> = std::result::Result<T, HarborError>;

// Conversion implementations for common error types

impl From<std::io::Error> for HarborError {
    fn from(err: std::io::Error) -> Self {
        HarborError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for HarborError {
    fn from(err: serde_json::Error) -> Self {
        HarborError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for HarborError {
    fn from(err: reqwest::Error) -> Self {
        HarborError::Network {
            message: err.to_string(),
            cause: Some(err.to_string()),
        }
    }
}

impl HarborError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        HarborError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error is a transient transport failure.
    ///
    /// Harbor never retries automatically; callers use this to decide whether
    /// a fresh `start` call is worth suggesting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarborError::Network { .. } | HarborError::FetchFailed { .. }
        )
    }

    /// Check if this error is a user-initiated cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HarborError::Cancelled)
    }
}
