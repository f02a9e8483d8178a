//! Error types for the file transfer engine.
//!
//! `EngineError` covers endpoint-level failures (scan, configuration, commit)
//! and per-file failures that are routed through the poll-strategy hook.
//! A read lock that cannot be acquired is not an error: it surfaces as
//! `TransferOutcome::Skipped(SkipReason::LockDenied)` and the file is retried
//! on the next poll.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error raised by a collaborator while processing a file.
pub type ProcessError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Starting directory does not exist and may not be auto-created
    #[error("starting directory not found: {}", path.display())]
    StartingDirectoryNotFound { path: PathBuf },

    /// Starting directory exists but is not readable and writable
    #[error("starting directory is not accessible: {}", path.display())]
    StartingDirectoryAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory traversal failed
    #[error("failed to scan directory: {}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// Generic filesystem failure with the operation that triggered it
    #[error("{operation} failed: {}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Invalid or mutually exclusive options; raised at construction only
    #[error("invalid option {option}: {reason}")]
    Configuration { option: &'static str, reason: String },

    /// Regular expression in include/exclude failed to compile
    #[error("invalid regex for {option}")]
    Regex {
        option: &'static str,
        #[source]
        source: regex::Error,
    },

    /// Ant-style glob failed to compile
    #[error("invalid glob pattern '{pattern}'")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The `changed` read lock did not observe a stable file in time
    #[error("read lock timed out after {waited:?}: {}", path.display())]
    ReadLockTimeout { path: PathBuf, waited: Duration },

    /// The collaborator failed to process a file
    #[error("processing failed: {}", path.display())]
    Processing {
        path: PathBuf,
        #[source]
        source: ProcessError,
    },

    /// The terminal commit action failed after successful processing
    #[error("commit failed: {}", path.display())]
    Commit {
        path: PathBuf,
        #[source]
        source: Box<EngineError>,
    },

    /// Target exists and the file-exist policy forbids replacing it
    #[error("file already exists: {}", path.display())]
    FileExists { path: PathBuf },

    /// Target name resolves outside the producer directory
    #[error("path escapes starting directory: {}", path.display())]
    OutsideStartingDirectory { path: PathBuf },

    /// Copy fallback of a rename produced a file of the wrong size
    #[error("copy verification failed for {}: expected {expected} bytes, found {actual}", path.display())]
    CopyVerification {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

impl EngineError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            option,
            reason: reason.into(),
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::StartingDirectoryAccess { source, .. } | Self::Io { source, .. } => {
                source.raw_os_error()
            }
            Self::Scan { source, .. } => source.io_error().and_then(io::Error::raw_os_error),
            Self::Commit { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True for errors raised while validating configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Regex { .. } | Self::Glob { .. }
        )
    }
}
