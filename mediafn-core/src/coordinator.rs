//! Invocation coordinator: the top-level state machine.
//!
//! States run strictly forward: Received -> Staging -> Processing ->
//! Classifying -> Publishing -> Done. Any component failure jumps straight
//! to Done with the mapped outcome; the workspace is released on every path.
//! Each stage is budgeted from the remaining deadline minus the configured
//! safety margin, so teardown and result serialization always finish before
//! the platform's hard kill.
//!
//! This is also the single point where component errors become the final
//! [`Outcome`], keeping classification consistent regardless of which
//! component failed.

use crate::classify::{classify, Verdict};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::event::{plan_execution, InvocationEvent};
use crate::outcome::{FatalReason, FunctionResponse, Outcome, RetryReason};
use crate::probe::parse_probe_output;
use crate::publish::{artifact_key, publish};
use crate::runner;
use crate::staging::stage;
use crate::storage::ObjectStore;
use crate::utils::{format_bytes, format_duration};
use crate::workspace::Workspace;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Linear invocation lifecycle, tracked for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Received,
    Staging,
    Processing,
    Classifying,
    Publishing,
    Done,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvocationState::Received => "received",
            InvocationState::Staging => "staging",
            InvocationState::Processing => "processing",
            InvocationState::Classifying => "classifying",
            InvocationState::Publishing => "publishing",
            InvocationState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Processes one inbound event within `budget` and always returns a
/// structured response: component failures, exhausted deadlines, and even
/// panics inside the pipeline come back as mapped outcomes, never as an
/// unhandled crash.
pub fn handle_invocation(
    config: &CoreConfig,
    store: &dyn ObjectStore,
    event: &InvocationEvent,
    budget: Duration,
) -> FunctionResponse {
    let deadline = Instant::now() + budget;
    transition(&event.invocation_id, InvocationState::Received);

    let outcome = catch_unwind(AssertUnwindSafe(|| run_invocation(config, store, event, deadline)))
        .unwrap_or_else(|_| {
            Err(CoreError::Other(
                "invocation pipeline panicked".to_string(),
            ))
        })
        .unwrap_or_else(|e| outcome_from_error(&e));

    transition(&event.invocation_id, InvocationState::Done);
    log::info!(
        "[{}] outcome: {} (budget {})",
        event.invocation_id,
        outcome.kind(),
        format_duration(budget),
    );
    FunctionResponse::new(&event.invocation_id, &outcome)
}

fn run_invocation(
    config: &CoreConfig,
    store: &dyn ObjectStore,
    event: &InvocationEvent,
    deadline: Instant,
) -> CoreResult<Outcome> {
    let mut workspace = Workspace::acquire(&config.workspace_root, config.quota_bytes)?;
    // Drop on the workspace is the backstop for panics and early returns;
    // the explicit release below covers the ordinary path with logging.
    let result = drive(config, store, event, deadline, &workspace);
    workspace.release();
    result
}

/// The linear pipeline. Every `?` here lands in [`outcome_from_error`].
fn drive(
    config: &CoreConfig,
    store: &dyn ObjectStore,
    event: &InvocationEvent,
    deadline: Instant,
    workspace: &Workspace,
) -> CoreResult<Outcome> {
    transition(&event.invocation_id, InvocationState::Staging);
    remaining(deadline, config.safety_margin, "staging")?;
    let staged = stage(store, &event.input_ref, workspace, &config.allowed_kinds)?;

    transition(&event.invocation_id, InvocationState::Processing);
    // The runner may return up to term_grace after the deadline it is
    // given, so this stage reserves the grace on top of the teardown
    // margin; the margin itself stays untouched on every configuration.
    let timeout = remaining(
        deadline,
        config.safety_margin + config.term_grace,
        "processing",
    )?;
    let plan = plan_execution(event.media_profile, config, &staged.path, workspace, timeout);
    let result = runner::run(&plan.spec)?;

    transition(&event.invocation_id, InvocationState::Classifying);
    let artifact = match classify(&result, &plan.expectations, &config.rules) {
        Verdict::Success { artifact } => artifact,
        Verdict::Retry { reason, diagnostic } => {
            return Ok(Outcome::RetryableFailure { reason, diagnostic })
        }
        Verdict::Fatal { reason, diagnostic } => {
            return Ok(Outcome::FatalFailure { reason, diagnostic })
        }
    };

    let artifact_path = match artifact {
        Some(path) => path,
        None => materialize_probe_output(&event.invocation_id, &result.stdout, workspace)?,
    };

    // The quota bounds everything the invocation wrote, produced output
    // included, not just the staged input.
    let usage = workspace.usage_bytes()?;
    if usage > workspace.quota_bytes() {
        return Err(CoreError::ResourceExhausted(format!(
            "workspace holds {}, quota is {}",
            format_bytes(usage),
            format_bytes(workspace.quota_bytes()),
        )));
    }

    transition(&event.invocation_id, InvocationState::Publishing);
    remaining(deadline, config.safety_margin, "publishing")?;
    let key = artifact_key(&event.output_destination, &event.input_ref, event.media_profile);
    let artifact_ref = publish(store, &artifact_path, &key)?;

    Ok(Outcome::Success { artifact_ref })
}

/// Probe mode: validate the captured metadata and write it into the
/// workspace so the publisher has a file to hand over.
fn materialize_probe_output(
    invocation_id: &str,
    stdout: &str,
    workspace: &Workspace,
) -> CoreResult<PathBuf> {
    let summary = parse_probe_output(stdout)?;
    log::info!(
        "[{invocation_id}] probe: container={:?} duration={:?}s video_streams={} audio_streams={}",
        summary.container,
        summary.duration_secs,
        summary.video_streams,
        summary.audio_streams,
    );
    let path = workspace.path().join("probe.json");
    std::fs::write(&path, stdout.as_bytes())?;
    Ok(path)
}

/// Remaining budget for a stage: time to the deadline minus the safety
/// margin reserved for teardown. Exhausted budget is a retryable timeout.
fn remaining(deadline: Instant, margin: Duration, stage: &'static str) -> CoreResult<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    match left.checked_sub(margin) {
        Some(budget) if !budget.is_zero() => Ok(budget),
        _ => Err(CoreError::DeadlineExhausted(stage)),
    }
}

/// The single component-error to outcome mapping.
fn outcome_from_error(error: &CoreError) -> Outcome {
    log::warn!("invocation failed: {error}");
    let diagnostic = Some(error.to_string());
    match error {
        CoreError::InvalidInput(_) => Outcome::FatalFailure {
            reason: FatalReason::InvalidInput,
            diagnostic,
        },
        CoreError::TransientFetch(_) => Outcome::RetryableFailure {
            reason: RetryReason::TransientFetch,
            diagnostic,
        },
        CoreError::ResourceExhausted(_) => Outcome::RetryableFailure {
            reason: RetryReason::ResourceExhausted,
            diagnostic,
        },
        CoreError::PublishFailed(_) => Outcome::RetryableFailure {
            reason: RetryReason::PublishFailed,
            diagnostic,
        },
        CoreError::DeadlineExhausted(_) => Outcome::RetryableFailure {
            reason: RetryReason::Timeout,
            diagnostic,
        },
        CoreError::ProbeParse(_) => Outcome::FatalFailure {
            reason: FatalReason::NoOutputProduced,
            diagnostic,
        },
        // Infrastructure and configuration faults: retrying this input on
        // this code would reproduce them.
        CoreError::Io(_)
        | CoreError::Config(_)
        | CoreError::CommandStart { .. }
        | CoreError::DependencyNotFound(_)
        | CoreError::Other(_) => Outcome::FatalFailure {
            reason: FatalReason::ProcessingError,
            diagnostic,
        },
    }
}

fn transition(invocation_id: &str, state: InvocationState) {
    log::debug!("[{invocation_id}] state -> {state}");
}
