//! Error handling module for wizflow
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Per-file failures during a merge session are classified by [`FailureKind`]
//! and never abort the session.

use std::path::PathBuf;
use strum::Display;
use thiserror::Error;

/// Main error type for wizflow
#[derive(Error, Debug)]
pub enum WizflowError {
    /// Expected control file is absent (treated as "no patch" by callers)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Control file unreadable, unparsable or missing required fields
    #[error("Malformed input in {}: {reason}", .path.display())]
    MalformedInput { path: PathBuf, reason: String },

    /// Package download reported by the fetch collaborator
    #[error("Failed to fetch package '{package}' from source {source_id}: {reason}")]
    FetchFailure {
        source_id: u32,
        package: String,
        reason: String,
    },

    /// Archive extraction reported by the fetch collaborator
    #[error("Failed to extract {}: {reason}", .archive.display())]
    ExtractionFailure { archive: PathBuf, reason: String },

    /// A replace/insert/remove directive names a step that does not exist
    #[error("Unknown directive target: {0}")]
    UnknownDirectiveTarget(String),

    /// A merge session is already running
    #[error("A merge session is already in progress")]
    SessionBusy,

    /// IO errors (cache directory, control files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors (loading, parsing)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Service unit query or control failed
    #[error("Service error: {0}")]
    Service(String),
}

/// Result type alias for wizflow operations
pub type Result<T> = std::result::Result<T, WizflowError>;

impl WizflowError {
    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a malformed-input error
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a service error
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// Classify this error for a merge report
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_) => FailureKind::NotFound,
            Self::MalformedInput { .. } | Self::Json(_) => FailureKind::MalformedInput,
            Self::FetchFailure { .. } => FailureKind::FetchFailure,
            Self::ExtractionFailure { .. } => FailureKind::ExtractionFailure,
            Self::UnknownDirectiveTarget(_) => FailureKind::UnknownDirectiveTarget,
            Self::SessionBusy | Self::Io(_) | Self::Config(_) | Self::Service(_) => {
                FailureKind::Internal
            }
        }
    }
}

/// Classification of a control file's failed contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    MalformedInput,
    FetchFailure,
    ExtractionFailure,
    UnknownDirectiveTarget,
    Internal,
}
