//! Configuration for the mediafn core library.
//!
//! Configuration is read once from the environment at cold start and passed
//! explicitly into the coordinator. There are no ambient globals; components
//! receive the pieces they need, which keeps them testable in isolation.

use crate::classify::ClassifyRules;
use crate::error::{CoreError, CoreResult};
use crate::staging::MediaKind;
use std::path::PathBuf;
use std::time::Duration;

// Default constants

/// Default per-invocation workspace quota in bytes (512 MiB).
pub const DEFAULT_QUOTA_BYTES: u64 = 512 * 1024 * 1024;

/// Default reserve subtracted from the remaining budget before every stage,
/// guaranteeing teardown and result serialization finish before the
/// platform's hard kill.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_millis(3000);

/// Default grace period between the termination signal and the forced kill
/// of an external tool that overran its deadline.
pub const DEFAULT_TERM_GRACE: Duration = Duration::from_millis(2000);

/// Main configuration for the mediafn core library.
///
/// Constructed once at cold start (normally via [`CoreConfig::from_env`]) and
/// treated as immutable afterwards.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Path to the ffmpeg binary used for transform profiles.
    pub ffmpeg_path: PathBuf,

    /// Path to the ffprobe binary used for the probe profile.
    pub ffprobe_path: PathBuf,

    /// Byte quota for each invocation's workspace, bounding the staged
    /// input and the produced output combined.
    pub quota_bytes: u64,

    /// Teardown reserve subtracted from the remaining budget at every stage.
    pub safety_margin: Duration,

    /// Term-to-kill grace period for overrunning tool processes.
    pub term_grace: Duration,

    /// Base directory under which per-invocation workspaces are created.
    pub workspace_root: PathBuf,

    /// Media kinds the input stager accepts.
    pub allowed_kinds: Vec<MediaKind>,

    /// Exit-code and signal sets used by the result classifier. Pinned to
    /// the tool version in use.
    pub rules: ClassifyRules,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            term_grace: DEFAULT_TERM_GRACE,
            workspace_root: std::env::temp_dir(),
            allowed_kinds: MediaKind::default_allowed().to_vec(),
            rules: ClassifyRules::default(),
        }
    }
}

impl CoreConfig {
    /// Builds a configuration from `MEDIAFN_*` environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// Recognized variables: `MEDIAFN_FFMPEG`, `MEDIAFN_FFPROBE`,
    /// `MEDIAFN_QUOTA_BYTES`, `MEDIAFN_SAFETY_MARGIN_MS`,
    /// `MEDIAFN_GRACE_MS`, `MEDIAFN_WORKSPACE_ROOT`,
    /// `MEDIAFN_ALLOWED_KINDS` (comma-separated kind names).
    pub fn from_env() -> CoreResult<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MEDIAFN_FFMPEG") {
            config.ffmpeg_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("MEDIAFN_FFPROBE") {
            config.ffprobe_path = PathBuf::from(path);
        }
        if let Some(bytes) = parse_env_u64("MEDIAFN_QUOTA_BYTES")? {
            config.quota_bytes = bytes;
        }
        if let Some(ms) = parse_env_u64("MEDIAFN_SAFETY_MARGIN_MS")? {
            config.safety_margin = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env_u64("MEDIAFN_GRACE_MS")? {
            config.term_grace = Duration::from_millis(ms);
        }
        if let Ok(root) = std::env::var("MEDIAFN_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(root);
        }
        if let Ok(kinds) = std::env::var("MEDIAFN_ALLOWED_KINDS") {
            config.allowed_kinds = kinds
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|name| {
                    name.parse::<MediaKind>().map_err(|_| {
                        CoreError::Config(format!("unknown media kind in MEDIAFN_ALLOWED_KINDS: {name}"))
                    })
                })
                .collect::<CoreResult<Vec<_>>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency. Called by [`CoreConfig::from_env`];
    /// callers constructing a config by hand should call it themselves.
    pub fn validate(&self) -> CoreResult<()> {
        if self.quota_bytes == 0 {
            return Err(CoreError::Config("quota_bytes must be nonzero".to_string()));
        }
        if self.allowed_kinds.is_empty() {
            return Err(CoreError::Config(
                "allowed media kind list must not be empty".to_string(),
            ));
        }
        if self.ffmpeg_path.as_os_str().is_empty() || self.ffprobe_path.as_os_str().is_empty() {
            return Err(CoreError::Config("tool paths must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_env_u64(name: &str) -> CoreResult<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| CoreError::Config(format!("{name} must be an unsigned integer, got {value:?}"))),
        Err(_) => Ok(None),
    }
}
