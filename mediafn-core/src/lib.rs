//! Core library for the mediafn event-triggered media processing function.
//!
//! One invocation takes a reference to a media object, stages it into a
//! quota-bounded ephemeral workspace, runs ffmpeg or ffprobe as a
//! deadline-bounded child process, classifies the result through an ordered
//! rule pass, and publishes the artifact idempotently. The whole pipeline
//! always returns a structured outcome and always reclaims its workspace.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mediafn_core::{handle_invocation, CoreConfig, InvocationEvent, LocalObjectStore};
//! use std::time::Duration;
//!
//! let config = CoreConfig::from_env().unwrap();
//! let store = LocalObjectStore::new("/var/lib/mediafn/store");
//! let event: InvocationEvent = serde_json::from_str(
//!     r#"{"invocationId":"inv-1","inputRef":"clip.mov",
//!         "outputDestination":"out/","mediaProfile":"transcode-720p"}"#,
//! ).unwrap();
//!
//! let response = handle_invocation(&config, &store, &event, Duration::from_secs(300));
//! println!("{}", serde_json::to_string(&response).unwrap());
//! ```

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod external;
pub mod outcome;
pub mod probe;
pub mod publish;
pub mod runner;
pub mod staging;
pub mod storage;
pub mod utils;
pub mod workspace;

// Re-exports for public API
pub use classify::{classify as classify_result, ClassifyRules, Expectations, Verdict};
pub use config::CoreConfig;
pub use coordinator::{handle_invocation, InvocationState};
pub use error::{CoreError, CoreResult};
pub use event::{InvocationEvent, MediaProfile};
pub use external::{check_toolchain, ToolVersion};
pub use outcome::{FatalReason, FunctionResponse, Outcome, RetryReason};
pub use probe::{parse_probe_output, ProbeSummary};
pub use runner::{install_termination_handler, ProcessResult, ProcessSpec};
pub use staging::{MediaKind, StagedInput};
pub use storage::{LocalObjectStore, ObjectStore, StoreError};
pub use utils::{format_bytes, format_duration};
pub use workspace::Workspace;
