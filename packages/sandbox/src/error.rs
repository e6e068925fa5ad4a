// ABOUTME: Error types for sandboxed execution
// ABOUTME: Fatal engine errors, stats source failures, aggregation outcomes and request validation

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sandbox engine and orchestration failures
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Docker API errors not covered by a more specific variant
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Docker daemon unreachable
    #[error("Docker connection error: {0}. Is Docker running?")]
    Connection(String),

    /// Sandbox image missing and could not be built
    #[error("Docker build error: {0}")]
    Build(String),

    /// Sandbox container no longer exists
    #[error("Sandbox not found: {0}")]
    NotFound(String),

    /// Sandbox container could not be created or started
    #[error("Sandbox failed to start: {0}")]
    StartFailed(String),

    /// Sandbox did not exit before the wait timeout
    #[error("Sandbox wait timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The wait call itself failed without an exit status
    #[error("Sandbox wait failed: {0}")]
    WaitFailed(String),

    /// Execution request rejected before any sandbox was started
    #[error("Configuration error: {0}")]
    InvalidRequest(#[from] RequestError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Failures reported by a stats source while polling a sandbox
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsSourceError {
    /// A single query failed; the next poll may succeed
    #[error("stats query failed: {0}")]
    Transient(String),

    /// The polling mechanism cannot be used at all
    #[error("stats source unavailable: {0}")]
    Unavailable(String),
}

/// Reasons an energy estimate could not be derived from the collected samples
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("No statistics were collected.")]
    NoSamples,

    #[error("Stats collected but count is zero or parsing failed ({skipped} unparsable samples).")]
    Unparsable { skipped: usize },

    #[error("Run duration was zero or negative.")]
    NonPositiveDuration,
}

/// Errors raised while loading or checking an execution request
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Failed to read job file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid job file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("User code directory not found: {0}")]
    CodeDirectoryNotFound(PathBuf),
}

impl RequestError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
