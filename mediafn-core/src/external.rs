//! Toolchain verification at cold start.
//!
//! The classifier's exit-code sets are only valid for the tool build they
//! were enumerated against, so the configured binaries are checked for
//! presence and the pinned major version before the first invocation runs.

use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use std::path::Path;
use std::process::Command;

/// Major version line the classifier rules are pinned against.
pub const PINNED_FFMPEG_MAJOR: &str = "6";

/// First line of `<tool> -version` for one configured binary.
#[derive(Debug, Clone)]
pub struct ToolVersion {
    pub tool: String,
    pub version_line: String,
}

/// Verifies both configured binaries respond to `-version`.
///
/// A missing or non-executable binary is `DependencyNotFound`. A version
/// outside the pinned major line is logged loudly but not fatal; local
/// builds drift and the rules are configurable.
pub fn check_toolchain(config: &CoreConfig) -> CoreResult<Vec<ToolVersion>> {
    let mut versions = Vec::new();
    for tool in [&config.ffmpeg_path, &config.ffprobe_path] {
        versions.push(check_tool(tool)?);
    }
    Ok(versions)
}

fn check_tool(path: &Path) -> CoreResult<ToolVersion> {
    let output = Command::new(path).arg("-version").output().map_err(|e| {
        CoreError::DependencyNotFound(format!("{}: {e}", path.display()))
    })?;

    if !output.status.success() {
        return Err(CoreError::DependencyNotFound(format!(
            "{} exited with {:?} for -version",
            path.display(),
            output.status.code()
        )));
    }

    let version_line = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("")
        .to_string();

    let pinned_prefix = format!("version {PINNED_FFMPEG_MAJOR}.");
    if !version_line.contains(&pinned_prefix) {
        log::warn!(
            "{} reports '{version_line}', not the pinned {PINNED_FFMPEG_MAJOR}.x line; \
             classifier exit-code sets may not apply",
            path.display()
        );
    } else {
        log::info!("{}: {version_line}", path.display());
    }

    Ok(ToolVersion {
        tool: path.display().to_string(),
        version_line,
    })
}
