//! Error types and handling for dirshift
//!
//! This module provides the migration error taxonomy. Pre-flight errors abort a whole
//! batch before any filesystem mutation; every other error is scoped to a single job
//! and ends up in that job's [`MigrationResult`](crate::MigrationResult).

use crate::MoveStep;
use std::path::{Path, PathBuf};

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - the job stopped but nothing needs attention
    Low,
    /// Medium severity - the job failed and can be retried after inspection
    Medium,
    /// High severity - the batch was rejected or the job needs a rollback
    High,
    /// Critical severity - the filesystem may be inconsistent and needs manual repair
    Critical,
}

/// Main error type for dirshift operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Two jobs in one batch resolve to the same target directory
    #[error("Target path conflict: jobs '{first}' and '{second}' both resolve to {}", .path.display())]
    PathConflict {
        /// The colliding target path
        path: PathBuf,
        /// Identifier of the first job claiming the path
        first: String,
        /// Identifier of the second job claiming the path
        second: String,
    },

    /// The target volume cannot hold the batch
    #[error(
        "Insufficient space at {}: {required} bytes required, {available} bytes available",
        .path.display()
    )]
    InsufficientSpace {
        /// Target root that was probed
        path: PathBuf,
        /// Bytes the batch needs
        required: u64,
        /// Bytes the volume reports as available
        available: u64,
    },

    /// Filesystem operation failed
    #[error("I/O error while {operation} '{}': {source}", .path.display())]
    Io {
        /// What the engine was doing when the error occurred
        operation: String,
        /// Path the operation was applied to
        path: PathBuf,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// Target tree does not match the manifest captured before Copy
    #[error("Verification mismatch at '{}': {message}", .path.display())]
    VerificationMismatch {
        /// Path of the first mismatching entry
        path: PathBuf,
        /// What differed
        message: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Rollback could not restore the pre-migration state
    #[error("Rollback failed: {message}")]
    RollbackFailed {
        /// Description of the failed rollback step
        message: String,
    },

    /// A run with the same job identifier is already in flight
    #[error("Job '{id}' is already running")]
    AlreadyRunning {
        /// The in-flight job identifier
        id: String,
    },

    /// The same job identifier was submitted twice in one batch
    #[error("Job id '{id}' appears more than once in the batch")]
    DuplicateJob {
        /// The duplicated job identifier
        id: String,
    },

    /// Job cannot be run as described
    #[error("Invalid job '{id}': {message}")]
    InvalidJob {
        /// Job identifier
        id: String,
        /// Why the job was rejected
        message: String,
    },

    /// State machine violation
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// State the job was in
        from: MoveStep,
        /// State that was requested
        to: MoveStep,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Duplicate derived target paths
    PathConflict,
    /// Target volume too small
    InsufficientSpace,
    /// Create, copy, link or remove failure
    Io,
    /// Target does not match source manifest
    VerificationMismatch,
    /// Cancelled by the caller
    Cancelled,
    /// Rollback left the filesystem in an intermediate state
    RollbackFailed,
    /// Job identifier already in flight
    AlreadyRunning,
    /// Job rejected before it started
    InvalidJob,
    /// State machine violation
    InvalidState,
    /// Configuration errors
    Config,
    /// Other errors
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PathConflict => "PathConflict",
            Self::InsufficientSpace => "InsufficientSpace",
            Self::Io => "IOError",
            Self::VerificationMismatch => "VerificationMismatch",
            Self::Cancelled => "Cancelled",
            Self::RollbackFailed => "RollbackFailed",
            Self::AlreadyRunning => "AlreadyRunning",
            Self::InvalidJob => "InvalidJob",
            Self::InvalidState => "InvalidState",
            Self::Config => "Config",
            Self::Other => "Other",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathConflict { .. } => ErrorKind::PathConflict,
            Self::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            Self::Io { .. } => ErrorKind::Io,
            Self::VerificationMismatch { .. } => ErrorKind::VerificationMismatch,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            Self::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            Self::DuplicateJob { .. } | Self::InvalidJob { .. } => ErrorKind::InvalidJob,
            Self::InvalidTransition { .. } => ErrorKind::InvalidState,
            Self::Config { .. } => ErrorKind::Config,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled | Self::AlreadyRunning { .. } => ErrorSeverity::Low,
            Self::Io { .. } | Self::Other { .. } => ErrorSeverity::Medium,
            Self::PathConflict { .. }
            | Self::InsufficientSpace { .. }
            | Self::DuplicateJob { .. }
            | Self::InvalidJob { .. }
            | Self::Config { .. }
            | Self::VerificationMismatch { .. }
            | Self::InvalidTransition { .. } => ErrorSeverity::High,
            Self::RollbackFailed { .. } => ErrorSeverity::Critical,
        }
    }

    /// Check if this error is raised before any job of a batch starts
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::PathConflict { .. }
                | Self::InsufficientSpace { .. }
                | Self::DuplicateJob { .. }
                | Self::InvalidJob { .. }
        )
    }

    /// Underlying OS error kind, if this is an I/O error
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    /// Create a new I/O error with the operation and path it applies to
    pub fn io<S: Into<String>, P: Into<PathBuf>>(
        operation: S,
        path: P,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a new verification mismatch error
    pub fn mismatch<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::VerificationMismatch {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new rollback failure
    pub fn rollback_failed<S: Into<String>>(message: S) -> Self {
        Self::RollbackFailed {
            message: message.into(),
        }
    }

    /// Create a new invalid job error
    pub fn invalid_job<I: Into<String>, S: Into<String>>(id: I, message: S) -> Self {
        Self::InvalidJob {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Attach an operation and path to `std::io::Result` values
pub trait IoContext<T> {
    /// Convert the I/O error into [`Error::Io`] for `path`
    fn io_context(self, operation: &str, path: &Path) -> crate::Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, operation: &str, path: &Path) -> crate::Result<T> {
        self.map_err(|source| Error::io(operation, path, source))
    }
}
