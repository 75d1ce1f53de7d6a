//! Inbound event types and per-profile argument templates.
//!
//! The event selects a media profile; the profile owns the argument
//! template used to build the tool's [`ProcessSpec`]. Arguments are always
//! discrete vector elements, never concatenated into a shell line.

use crate::classify::Expectations;
use crate::config::CoreConfig;
use crate::runner::ProcessSpec;
use crate::workspace::Workspace;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One unit of work, as delivered by the event source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InvocationEvent {
    pub invocation_id: String,
    /// Object-store reference of the source media.
    pub input_ref: String,
    /// Destination prefix for the produced artifact, e.g. `out/`.
    pub output_destination: String,
    pub media_profile: MediaProfile,
}

/// Argument template selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MediaProfile {
    #[serde(rename = "transcode-720p")]
    Transcode720p,
    #[serde(rename = "transcode-1080p")]
    Transcode1080p,
    /// Metadata probe; the result is the tool's JSON on stdout.
    #[serde(rename = "probe")]
    Probe,
}

impl MediaProfile {
    pub fn is_probe(&self) -> bool {
        matches!(self, MediaProfile::Probe)
    }

    /// Suffix appended to the input stem in the artifact key.
    pub fn artifact_suffix(&self) -> &'static str {
        match self {
            MediaProfile::Transcode720p => "720p",
            MediaProfile::Transcode1080p => "1080p",
            MediaProfile::Probe => "probe",
        }
    }

    /// Container extension of the produced artifact.
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            MediaProfile::Transcode720p | MediaProfile::Transcode1080p => "mp4",
            MediaProfile::Probe => "json",
        }
    }

    /// Which configured tool binary this profile invokes.
    pub fn tool_path<'a>(&self, config: &'a CoreConfig) -> &'a Path {
        match self {
            MediaProfile::Probe => &config.ffprobe_path,
            _ => &config.ffmpeg_path,
        }
    }

    fn scale_filter(&self) -> Option<&'static str> {
        match self {
            MediaProfile::Transcode720p => Some("scale=-2:720"),
            MediaProfile::Transcode1080p => Some("scale=-2:1080"),
            MediaProfile::Probe => None,
        }
    }
}

impl fmt::Display for MediaProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaProfile::Transcode720p => f.write_str("transcode-720p"),
            MediaProfile::Transcode1080p => f.write_str("transcode-1080p"),
            MediaProfile::Probe => f.write_str("probe"),
        }
    }
}

/// A built spec plus what the classifier should expect from it.
#[derive(Debug)]
pub struct PlannedExecution {
    pub spec: ProcessSpec,
    pub expectations: Expectations,
}

/// Resolves the profile's argument template against the staged input.
///
/// Transform profiles write to a scratch file inside the workspace; the
/// probe profile captures stdout instead.
pub fn plan_execution(
    profile: MediaProfile,
    config: &CoreConfig,
    input: &Path,
    workspace: &Workspace,
    timeout: Duration,
) -> PlannedExecution {
    let input_arg = input.to_string_lossy().into_owned();

    let (args, output_file, capture_stdout) = match profile {
        MediaProfile::Probe => (
            vec![
                "-v".to_string(),
                "quiet".to_string(),
                "-print_format".to_string(),
                "json".to_string(),
                "-show_format".to_string(),
                "-show_streams".to_string(),
                input_arg,
            ],
            None,
            true,
        ),
        MediaProfile::Transcode720p | MediaProfile::Transcode1080p => {
            let output: PathBuf = workspace.scratch_path("out", profile.artifact_extension());
            let args = vec![
                "-y".to_string(),
                "-hide_banner".to_string(),
                "-nostdin".to_string(),
                "-i".to_string(),
                input_arg,
                "-vf".to_string(),
                profile.scale_filter().unwrap_or_default().to_string(),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "medium".to_string(),
                "-crf".to_string(),
                "23".to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
                "-movflags".to_string(),
                "+faststart".to_string(),
                output.to_string_lossy().into_owned(),
            ];
            (args, Some(output), false)
        }
    };

    PlannedExecution {
        spec: ProcessSpec {
            program: profile.tool_path(config).to_path_buf(),
            args,
            current_dir: workspace.path().to_path_buf(),
            timeout,
            term_grace: config.term_grace,
            capture_stdout,
        },
        expectations: Expectations {
            output_file,
            expects_stdout: capture_stdout,
        },
    }
}
