//! Error types for the mediafn core library.
//!
//! Every component surfaces a typed error rather than an opaque one; the
//! invocation coordinator is the single place these are mapped into the
//! final function outcome.

use thiserror::Error;

/// Errors produced by mediafn-core components.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Caller error: malformed reference, oversized input, disallowed media
    /// kind. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Source-side I/O fault distinguishable from malformed input. Retryable.
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// The sandbox cannot host the requested workspace quota. Retryable.
    #[error("Workspace storage exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Failed to start {tool}: {message}")]
    CommandStart { tool: String, message: String },

    #[error("Required tool not found: {0}")]
    DependencyNotFound(String),

    /// Artifact could not be made durably available. Retryable.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The remaining invocation budget cannot cover the named stage.
    #[error("Deadline exhausted before {0}")]
    DeadlineExhausted(&'static str),

    #[error("Failed to parse probe output: {0}")]
    ProbeParse(String),

    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for mediafn-core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
