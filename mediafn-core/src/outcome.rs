//! Invocation outcomes and the serialized function result.
//!
//! Exactly one [`Outcome`] exists per invocation. The variant determines the
//! function's return contract: the platform retries `RetryableFailure` and
//! drops `FatalFailure`, where a retry would only reproduce the failure.

use serde::Serialize;
use std::fmt;

/// Reasons for a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// The external tool overran its deadline and was killed.
    Timeout,
    /// The sandbox or the tool ran out of a recoverable resource.
    ResourceExhausted,
    /// The input object could not be fetched due to a source-side fault.
    TransientFetch,
    /// The artifact could not be made durably available.
    PublishFailed,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetryReason::Timeout => "timeout",
            RetryReason::ResourceExhausted => "resource-exhausted",
            RetryReason::TransientFetch => "transient-fetch",
            RetryReason::PublishFailed => "publish-failed",
        };
        f.write_str(s)
    }
}

/// Reasons for a fatal, non-retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// The event or the staged object failed validation.
    InvalidInput,
    /// The tool identified the media itself as malformed.
    InvalidMedia,
    /// The tool failed for a reason a retry would reproduce.
    ProcessingError,
    /// The tool reported success but produced no usable output.
    NoOutputProduced,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FatalReason::InvalidInput => "invalid-input",
            FatalReason::InvalidMedia => "invalid-media",
            FatalReason::ProcessingError => "processing-error",
            FatalReason::NoOutputProduced => "no-output-produced",
        };
        f.write_str(s)
    }
}

/// Terminal classification of one invocation. Immutable once set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The artifact is durably available at `artifact_ref`.
    Success { artifact_ref: String },
    RetryableFailure {
        reason: RetryReason,
        diagnostic: Option<String>,
    },
    FatalFailure {
        reason: FatalReason,
        diagnostic: Option<String>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::RetryableFailure { .. } => "retryable",
            Outcome::FatalFailure { .. } => "fatal",
        }
    }
}

/// The structured result handed back to the function platform.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FunctionResponse {
    pub invocation_id: String,
    /// `success`, `retryable`, or `fatal`.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl FunctionResponse {
    pub fn new(invocation_id: &str, outcome: &Outcome) -> Self {
        let (reason, artifact_ref, diagnostic) = match outcome {
            Outcome::Success { artifact_ref } => (None, Some(artifact_ref.clone()), None),
            Outcome::RetryableFailure { reason, diagnostic } => {
                (Some(reason.to_string()), None, diagnostic.clone())
            }
            Outcome::FatalFailure { reason, diagnostic } => {
                (Some(reason.to_string()), None, diagnostic.clone())
            }
        };
        Self {
            invocation_id: invocation_id.to_string(),
            outcome: outcome.kind().to_string(),
            reason,
            artifact_ref,
            diagnostic,
        }
    }
}
