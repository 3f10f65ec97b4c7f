/// Unified error handling for the verifier
///
/// Fatal conditions (process spawn, session creation, settings, artifact
/// writes) surface as `VerifierError`. Connection failures never do: they are
/// classified into a `ProbeOutcome` and absorbed by the retry loop.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use crate::config::ConfigError;

/// Main error type for verifier operations
#[derive(Debug, Error)]
pub enum VerifierError {
    /// Settings could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Fork or session setup failed
    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),

    /// PID or token file could not be written
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// The retry loop stopped without a successful probe
    #[error("Retry loop stopped: {0}")]
    Retry(#[from] RetryError),

    /// Generic I/O errors (runtime construction, signal registration)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the detachment step
#[derive(Debug, Error)]
pub enum DaemonError {
    /// fork(2) failed; nothing was detached
    #[error("process spawn failed: {0}")]
    Spawn(String),

    /// setsid(2) failed in the child
    #[error("session creation failed: {0}")]
    Session(String),

    /// Standard stream redirection or chdir failed
    #[error("{context}: {message}")]
    Setup {
        context: &'static str,
        message: String,
    },
}

/// Failures writing one of the run artifacts
#[derive(Debug, Error)]
#[error("could not {what} {path:?}: {source}")]
pub struct ArtifactError {
    pub what: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl ArtifactError {
    pub fn new(what: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            what,
            path: path.into(),
            source,
        }
    }
}

/// Ways the retry loop can end without a success
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("shutdown requested after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("endpoint still unreachable after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },
}

/// Result type alias for verifier operations
pub type VerifierResult<T> = Result<T, VerifierError>;

impl VerifierError {
    /// Check if this error is recoverable (a later run may succeed)
    pub fn is_recoverable(&self) -> bool {
        match self {
            VerifierError::Retry(_) => true,
            VerifierError::Io(_) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            VerifierError::Config(_) => ErrorSeverity::Critical,
            VerifierError::Daemon(_) => ErrorSeverity::Critical,
            VerifierError::Artifact(_) => ErrorSeverity::Error,
            VerifierError::Io(_) => ErrorSeverity::Error,
            VerifierError::Retry(RetryError::Cancelled { .. }) => ErrorSeverity::Info,
            VerifierError::Retry(RetryError::Exhausted { .. }) => ErrorSeverity::Warning,
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            VerifierError::Retry(RetryError::Cancelled { .. }) => 0,
            VerifierError::Retry(RetryError::Exhausted { .. }) => 2,
            _ => 1,
        }
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that abort the run
    Critical,
    /// Errors that abort the run but may succeed on relaunch
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational, expected endings
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
