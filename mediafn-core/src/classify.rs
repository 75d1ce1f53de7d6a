//! Result classification: turning a [`ProcessResult`] into a verdict.
//!
//! A nonzero exit code alone cannot separate "bad input media" from "tool
//! crashed" from "ran out of memory", so classification is an ordered rule
//! pass. Precedence matters and is fixed: an earlier, more specific rule is
//! never overridden by a later one. A result that is both timed out and
//! carrying a malformed-input exit code is a timeout, full stop.
//!
//! The exit-code and signal sets are data, pinned to the tool build in use,
//! so a different ffmpeg version changes [`ClassifyRules`] and nothing else.

use crate::outcome::{FatalReason, RetryReason};
use crate::runner::ProcessResult;
use std::path::PathBuf;

/// Exit-code and signal sets for the pinned tool build (ffmpeg 6.x line).
#[derive(Debug, Clone)]
pub struct ClassifyRules {
    /// Exit codes the tool uses for malformed input. The pinned build exits
    /// 1 for demuxer/decoder failures, so stderr must corroborate (see
    /// `malformed_markers`) before the code alone condemns the input.
    pub malformed_exit_codes: Vec<i32>,
    /// Stderr fragments that confirm a malformed-input failure.
    pub malformed_markers: Vec<String>,
    /// Signals indicating the tool was killed for resource exhaustion
    /// (SIGKILL from the cgroup OOM killer).
    pub oom_signals: Vec<i32>,
    /// Exit codes equivalent to the above when the signal is reported as a
    /// 128+n code by an intermediate shell.
    pub oom_exit_codes: Vec<i32>,
}

impl Default for ClassifyRules {
    fn default() -> Self {
        Self {
            malformed_exit_codes: vec![1],
            malformed_markers: vec![
                "Invalid data found when processing input".to_string(),
                "moov atom not found".to_string(),
                "could not find codec parameters".to_string(),
                "Header missing".to_string(),
                "Invalid argument".to_string(),
            ],
            oom_signals: vec![9],
            oom_exit_codes: vec![137],
        }
    }
}

/// What the classifier checks the produced output against.
#[derive(Debug, Clone, Default)]
pub struct Expectations {
    /// Output file the tool was asked to produce, if any.
    pub output_file: Option<PathBuf>,
    /// Whether the tool's result is carried on stdout (probe mode).
    pub expects_stdout: bool,
}

/// Classifier verdict, consumed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The execution produced its expected output. `artifact` is the output
    /// file for transform profiles, `None` for probe mode where the result
    /// rides on stdout.
    Success { artifact: Option<PathBuf> },
    Retry {
        reason: RetryReason,
        diagnostic: Option<String>,
    },
    Fatal {
        reason: FatalReason,
        diagnostic: Option<String>,
    },
}

/// Applies the rule pass, in order:
///
/// 1. killed at the deadline            -> retryable `timeout`
/// 2. malformed-input exit code         -> fatal `invalid-media`
/// 3. resource-exhaustion kill          -> retryable `resource-exhausted`
/// 4. any other nonzero exit or signal  -> fatal `processing-error`
/// 5. clean exit, output missing/empty  -> fatal `no-output-produced`
/// 6. otherwise                         -> success
pub fn classify(result: &ProcessResult, expectations: &Expectations, rules: &ClassifyRules) -> Verdict {
    // 1. Timeout takes precedence over everything the dying tool reported.
    if result.timed_out {
        return Verdict::Retry {
            reason: RetryReason::Timeout,
            diagnostic: excerpt(result),
        };
    }

    // 2. The tool recognized the input and rejected it.
    if let Some(code) = result.exit_code {
        if rules.malformed_exit_codes.contains(&code) && stderr_confirms_malformed(result, rules) {
            return Verdict::Fatal {
                reason: FatalReason::InvalidMedia,
                diagnostic: excerpt(result),
            };
        }
    }

    // 3. Killed for memory, not broken input: worth retrying.
    let oom_signal = result.signal.is_some_and(|s| rules.oom_signals.contains(&s));
    let oom_code = result.exit_code.is_some_and(|c| rules.oom_exit_codes.contains(&c));
    if oom_signal || oom_code {
        return Verdict::Retry {
            reason: RetryReason::ResourceExhausted,
            diagnostic: excerpt(result),
        };
    }

    // 4. Any other failure: retrying would reproduce it.
    if result.exit_code != Some(0) {
        return Verdict::Fatal {
            reason: FatalReason::ProcessingError,
            diagnostic: excerpt(result),
        };
    }

    // 5. Clean exit must still have produced something.
    if expectations.expects_stdout && result.stdout.trim().is_empty() {
        return Verdict::Fatal {
            reason: FatalReason::NoOutputProduced,
            diagnostic: Some("tool exited cleanly but wrote no metadata to stdout".to_string()),
        };
    }
    if let Some(output) = &expectations.output_file {
        let produced = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if produced == 0 {
            return Verdict::Fatal {
                reason: FatalReason::NoOutputProduced,
                diagnostic: Some(format!(
                    "tool exited cleanly but {} is missing or empty",
                    output.display()
                )),
            };
        }
    }

    // 6. Success.
    Verdict::Success {
        artifact: expectations.output_file.clone(),
    }
}

fn stderr_confirms_malformed(result: &ProcessResult, rules: &ClassifyRules) -> bool {
    rules
        .malformed_markers
        .iter()
        .any(|marker| result.stderr_excerpt.contains(marker.as_str()))
}

fn excerpt(result: &ProcessResult) -> Option<String> {
    if result.stderr_excerpt.trim().is_empty() {
        None
    } else {
        Some(result.stderr_excerpt.clone())
    }
}
