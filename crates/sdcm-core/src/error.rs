//! Error types for the sdcm engine.
//!
//! Errors are grouped the way callers need to react to them: I/O and parse
//! failures are attributed to a single file or document, store failures to
//! the statement that raised them, and cancellation aborts a whole batch.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the sdcm engine.
#[derive(Debug, Error)]
pub enum SdcmError {
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

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Image decode failed for {path}: {message}")]
    Image { path: PathBuf, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Registry errors
    #[error("Registry ingest failed: {message}")]
    Ingest { message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Registry returned status {status} for {url}")]
    RegistryStatus { url: String, status: u16 },

    #[error("Record not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    // Control flow
    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Task(String),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for sdcm operations.
pub type Result<T> = std::result::Result<T, SdcmError>;

impl From<std::io::Error> for SdcmError {
    fn from(err: std::io::Error) -> Self {
        SdcmError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SdcmError {
    fn from(err: serde_json::Error) -> Self {
        SdcmError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for SdcmError {
    fn from(err: rusqlite::Error) -> Self {
        SdcmError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for SdcmError {
    fn from(err: reqwest::Error) -> Self {
        SdcmError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<image::ImageError> for SdcmError {
    fn from(err: image::ImageError) -> Self {
        SdcmError::Image {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for SdcmError {
    fn from(err: tokio::task::JoinError) -> Self {
        SdcmError::Task(err.to_string())
    }
}

impl SdcmError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            return SdcmError::FileNotFound(path);
        }
        SdcmError::Io {
            message: err.to_string(),
            path: Some(path),
            source: Some(err),
        }
    }

    /// Create a database error from a poisoned connection lock.
    pub(crate) fn lock_poisoned() -> Self {
        SdcmError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        SdcmError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Server-side failures (5xx) and rate limiting are transient; other
    /// registry statuses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SdcmError::Network { .. } => true,
            SdcmError::RegistryStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// True for control-flow errors that must abort the enclosing batch.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SdcmError::Cancelled)
    }
}
