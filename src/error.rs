//! Error types for podkeep
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Download, Transfer, Feed, Job, Database)
//! - A coarse [`ErrorKind`] taxonomy callers can branch on
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for podkeep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for podkeep
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.max_concurrent_downloads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// A single transfer attempt failed
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Fetching or parsing a feed failed
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Scheduler job error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Podcast, episode or other record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied value was rejected (bad feed URL, retention out of range)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Insufficient disk space, detected before any bytes were written
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Play-state oracle could not be reached
    #[error("play-state oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Operation was cancelled by shutdown or removal
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Download task not found
    #[error("download {id} not found")]
    NotFound {
        /// The download ID that was not found
        id: i64,
    },

    /// A pending or downloading task already exists for the episode
    #[error("episode {episode_id} is already queued as download {id}")]
    AlreadyQueued {
        /// The episode that was offered for queueing
        episode_id: i64,
        /// The existing non-terminal task
        id: i64,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} download {id} in state {current_state}")]
    InvalidState {
        /// The download ID that is in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "retry", "remove")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },
}

/// Errors produced by a single transfer attempt
#[derive(Debug, Error)]
pub enum TransferError {
    /// Connection, DNS or body read failure
    #[error("network failure: {0}")]
    Network(String),

    /// The transfer exceeded its ceiling duration
    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),

    /// Server answered with a non-success status code
    #[error("unexpected HTTP status {0}")]
    BadStatus(u16),

    /// The disk filled up while bytes were being written
    #[error("disk full after writing {written} bytes")]
    StorageFull {
        /// Bytes written before the write failed
        written: u64,
    },

    /// Local write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transfer observed cancellation and stopped
    #[error("transfer cancelled")]
    Cancelled,
}

/// Errors produced by the feed source
#[derive(Debug, Error)]
pub enum FeedError {
    /// Feed could not be fetched
    #[error("failed to fetch feed {url}: {reason}")]
    Network {
        /// The feed URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// Feed was fetched but is neither RSS nor Atom
    #[error("failed to parse feed {url}: {reason}")]
    Parse {
        /// The feed URL
        url: String,
        /// Parser message
        reason: String,
    },
}

/// Job scheduler errors
#[derive(Debug, Error)]
pub enum JobError {
    /// No job is registered under the id
    #[error("job '{id}' is not registered")]
    NotFound {
        /// The job id
        id: String,
    },

    /// The job is already executing; the duplicate trigger was not run
    #[error("job '{id}' is already running")]
    AlreadyRunning {
        /// The job id
        id: String,
    },
}

/// Coarse classification of an [`Error`], used by callers and by logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or timeout failure that may succeed on retry
    TransientIo,
    /// Disk space exhausted
    ResourceExhaustion,
    /// Already queued, job already running, or state mismatch
    Conflict,
    /// Unknown job, task, podcast or episode id
    NotFound,
    /// An external collaborator (feed host, oracle) is unavailable
    ExternalUnavailable,
    /// Invalid input or configuration
    Invalid,
    /// The process is shutting down
    Unavailable,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Machine-readable name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::ResourceExhaustion => "resource_exhaustion",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ExternalUnavailable => "external_unavailable",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } | Error::InvalidInput(_) => ErrorKind::Invalid,

            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Download(DownloadError::NotFound { .. }) => ErrorKind::NotFound,
            Error::Job(JobError::NotFound { .. }) => ErrorKind::NotFound,

            Error::Download(DownloadError::AlreadyQueued { .. }) => ErrorKind::Conflict,
            Error::Download(DownloadError::InvalidState { .. }) => ErrorKind::Conflict,
            Error::Job(JobError::AlreadyRunning { .. }) => ErrorKind::Conflict,

            Error::InsufficientSpace { .. } => ErrorKind::ResourceExhaustion,
            Error::Transfer(TransferError::StorageFull { .. }) => ErrorKind::ResourceExhaustion,

            Error::Transfer(TransferError::Network(_)) => ErrorKind::TransientIo,
            Error::Transfer(TransferError::Timeout(_)) => ErrorKind::TransientIo,
            Error::Transfer(TransferError::BadStatus(_)) => ErrorKind::TransientIo,
            Error::Transfer(TransferError::Io(_)) => ErrorKind::TransientIo,
            Error::Network(_) => ErrorKind::TransientIo,

            Error::Feed(_) => ErrorKind::ExternalUnavailable,
            Error::OracleUnavailable(_) => ErrorKind::ExternalUnavailable,

            Error::ShuttingDown => ErrorKind::Unavailable,
            Error::Transfer(TransferError::Cancelled) => ErrorKind::Unavailable,
            Error::Cancelled => ErrorKind::Unavailable,

            Error::Database(_)
            | Error::Sqlx(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::DiskSpaceCheckFailed(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether this is an expected conflict (reported to the caller, not logged as an error)
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Download(e) => match e {
                DownloadError::NotFound { .. } => "download_not_found",
                DownloadError::AlreadyQueued { .. } => "already_queued",
                DownloadError::InvalidState { .. } => "invalid_state",
            },
            Error::Transfer(e) => match e {
                TransferError::Network(_) => "network_error",
                TransferError::Timeout(_) => "timeout",
                TransferError::BadStatus(_) => "bad_status",
                TransferError::StorageFull { .. } => "storage_full",
                TransferError::Io(_) => "io_error",
                TransferError::Cancelled => "cancelled",
            },
            Error::Feed(FeedError::Network { .. }) => "feed_unreachable",
            Error::Feed(FeedError::Parse { .. }) => "feed_parse_error",
            Error::Job(JobError::NotFound { .. }) => "job_not_found",
            Error::Job(JobError::AlreadyRunning { .. }) => "already_running",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::DiskSpaceCheckFailed(_) => "disk_space_check_failed",
            Error::OracleUnavailable(_) => "oracle_unavailable",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Structured error returned across the control surface
///
/// # Example JSON
///
/// ```json
/// {
///   "error": {
///     "kind": "conflict",
///     "code": "already_queued",
///     "message": "download error: episode 7 is already queued as download 3",
///     "details": { "episode_id": 7, "download_id": 3 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Taxonomy kind
    pub kind: ErrorKind,

    /// Machine-readable error code (e.g., "already_queued", "job_not_found")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with kind, code and message
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                kind,
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NotFound,
            "not_found",
            format!("{} not found", resource.into()),
        )
    }

    /// Create a "conflict" error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, "conflict", message)
    }

    /// Create an "internal" error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "internal_error", message)
    }
}

impl From<&Error> for ApiError {
    fn from(error: &Error) -> Self {
        let details = match error {
            Error::Download(DownloadError::NotFound { id }) => Some(serde_json::json!({
                "download_id": id,
            })),
            Error::Download(DownloadError::AlreadyQueued { episode_id, id }) => {
                Some(serde_json::json!({
                    "episode_id": episode_id,
                    "download_id": id,
                }))
            }
            Error::Download(DownloadError::InvalidState {
                id,
                operation,
                current_state,
            }) => Some(serde_json::json!({
                "download_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::Job(JobError::NotFound { id }) | Error::Job(JobError::AlreadyRunning { id }) => {
                Some(serde_json::json!({ "job_id": id }))
            }
            Error::InsufficientSpace {
                required,
                available,
            } => Some(serde_json::json!({
                "required_bytes": required,
                "available_bytes": available,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                kind: error.kind(),
                code: error.error_code().to_string(),
                message: error.to_string(),
                details,
            },
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError::from(&error)
    }
}
