//! End-to-end invocation scenarios driven with stub tool binaries.
//!
//! The stubs are small shell scripts standing in for ffmpeg/ffprobe, which
//! keeps the scenarios about lifecycle and classification rather than about
//! codecs.

#![cfg(unix)]

use mediafn_core::{
    handle_invocation, ClassifyRules, CoreConfig, InvocationEvent, LocalObjectStore, MediaKind,
    ObjectStore,
};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

struct Fixture {
    _dir: tempfile::TempDir,
    store: LocalObjectStore,
    config: CoreConfig,
    workspace_root: PathBuf,
    bin_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store_root = dir.path().join("store");
        std::fs::create_dir_all(&store_root).unwrap();
        let workspace_root = dir.path().join("workspaces");
        let bin_dir = dir.path().join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();

        let config = CoreConfig {
            ffmpeg_path: bin_dir.join("ffmpeg"),
            ffprobe_path: bin_dir.join("ffprobe"),
            quota_bytes: 8 * 1024 * 1024,
            safety_margin: Duration::from_millis(200),
            term_grace: Duration::from_millis(300),
            workspace_root: workspace_root.clone(),
            allowed_kinds: MediaKind::default_allowed().to_vec(),
            rules: ClassifyRules::default(),
        };

        Self {
            _dir: dir,
            store: LocalObjectStore::new(store_root),
            config,
            workspace_root,
            bin_dir,
        }
    }

    fn write_stub(&self, name: &str, body: &str) {
        let path = self.bin_dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn seed_mp4(&self, reference: &str, size: usize) {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x20];
        bytes.extend_from_slice(b"ftypisom");
        bytes.resize(size.max(16), 0);
        std::fs::write(self.store.root().join(reference), bytes).unwrap();
    }

    fn workspaces_left(&self) -> usize {
        std::fs::read_dir(&self.workspace_root)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    fn fetch_string(&self, reference: &str) -> String {
        let mut out = String::new();
        self.store
            .fetch(reference)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    }
}

fn event(profile: &str) -> InvocationEvent {
    serde_json::from_str(&format!(
        r#"{{
            "invocationId": "inv-e2e",
            "inputRef": "clip.mov",
            "outputDestination": "out/",
            "mediaProfile": "{profile}"
        }}"#
    ))
    .unwrap()
}

/// Stub encoder: writes a fixed-size output to its last argument.
const TRANSCODE_OK: &str = r#"for a in "$@"; do out="$a"; done
dd if=/dev/zero of="$out" bs=1024 count=30 2>/dev/null
exit 0"#;

#[test]
fn transcode_succeeds_and_publishes_deterministically() {
    let fixture = Fixture::new();
    fixture.write_stub("ffmpeg", TRANSCODE_OK);
    fixture.seed_mp4("clip.mov", 50 * 1024);

    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(30),
    );

    assert_eq!(response.outcome, "success", "{response:?}");
    assert_eq!(response.artifact_ref.as_deref(), Some("out/clip-720p.mp4"));
    assert!(fixture.store.exists("out/clip-720p.mp4").unwrap());
    assert_eq!(fixture.workspaces_left(), 0);
}

#[test]
fn replayed_invocation_reuses_the_published_artifact() {
    let fixture = Fixture::new();
    fixture.write_stub("ffmpeg", TRANSCODE_OK);
    fixture.seed_mp4("clip.mov", 4 * 1024);

    let first = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(30),
    );
    let second = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(30),
    );

    assert_eq!(first.artifact_ref, second.artifact_ref);
    let out_dir = fixture.store.root().join("out");
    assert_eq!(std::fs::read_dir(out_dir).unwrap().count(), 1);
}

#[test]
fn tool_timeout_is_retryable_and_leaks_nothing() {
    let fixture = Fixture::new();
    fixture.write_stub("ffmpeg", "sleep 60");
    fixture.seed_mp4("clip.mov", 4 * 1024);

    let started = Instant::now();
    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(1),
    );

    assert_eq!(response.outcome, "retryable");
    assert_eq!(response.reason.as_deref(), Some("timeout"));
    assert!(response.artifact_ref.is_none());
    assert!(!fixture
        .store
        .exists("out/clip-720p.mp4")
        .unwrap_or(true));
    assert_eq!(fixture.workspaces_left(), 0);
    // Bounded blocking: budget + grace + slack, nowhere near the 60s stub.
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn malformed_media_reported_by_the_tool_is_fatal() {
    let fixture = Fixture::new();
    fixture.write_stub(
        "ffmpeg",
        "echo 'clip.mov: Invalid data found when processing input' >&2\nexit 1",
    );
    fixture.seed_mp4("clip.mov", 4 * 1024);

    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(30),
    );

    assert_eq!(response.outcome, "fatal");
    assert_eq!(response.reason.as_deref(), Some("invalid-media"));
    assert!(response
        .diagnostic
        .as_deref()
        .unwrap()
        .contains("Invalid data found"));
    assert_eq!(fixture.workspaces_left(), 0);
}

#[test]
fn text_file_with_media_extension_never_reaches_the_tool() {
    let fixture = Fixture::new();
    // A stub that would leave a marker if it ever ran.
    fixture.write_stub("ffmpeg", "touch ran-anyway; exit 0");
    std::fs::write(
        fixture.store.root().join("clip.mov"),
        b"plain text wearing a video extension",
    )
    .unwrap();

    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(30),
    );

    assert_eq!(response.outcome, "fatal");
    assert_eq!(response.reason.as_deref(), Some("invalid-input"));
    assert!(!Path::new("ran-anyway").exists());
    assert_eq!(fixture.workspaces_left(), 0);
}

#[test]
fn clean_exit_without_output_is_fatal_no_output() {
    let fixture = Fixture::new();
    fixture.write_stub("ffmpeg", "exit 0");
    fixture.seed_mp4("clip.mov", 4 * 1024);

    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(30),
    );

    assert_eq!(response.outcome, "fatal");
    assert_eq!(response.reason.as_deref(), Some("no-output-produced"));
}

#[test]
fn probe_publishes_validated_metadata_json() {
    let fixture = Fixture::new();
    fixture.write_stub(
        "ffprobe",
        r#"cat <<'EOF'
{"streams":[{"codec_type":"video"},{"codec_type":"audio"}],
 "format":{"format_name":"mov,mp4,m4a,3gp,3g2,mj2","duration":"5.000000","size":"57344"}}
EOF"#,
    );
    fixture.seed_mp4("clip.mov", 4 * 1024);

    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("probe"),
        Duration::from_secs(30),
    );

    assert_eq!(response.outcome, "success", "{response:?}");
    assert_eq!(response.artifact_ref.as_deref(), Some("out/clip-probe.json"));
    let published = fixture.fetch_string("out/clip-probe.json");
    assert!(published.contains("\"duration\""));
    assert_eq!(fixture.workspaces_left(), 0);
}

#[test]
fn probe_garbage_stdout_is_fatal_no_output() {
    let fixture = Fixture::new();
    fixture.write_stub("ffprobe", "echo 'not json at all'");
    fixture.seed_mp4("clip.mov", 4 * 1024);

    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("probe"),
        Duration::from_secs(30),
    );

    assert_eq!(response.outcome, "fatal");
    assert_eq!(response.reason.as_deref(), Some("no-output-produced"));
    assert_eq!(fixture.workspaces_left(), 0);
}

#[test]
fn oom_killed_tool_is_retryable_resource_exhaustion() {
    let fixture = Fixture::new();
    fixture.write_stub("ffmpeg", "kill -9 $$");
    fixture.seed_mp4("clip.mov", 4 * 1024);

    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(30),
    );

    assert_eq!(response.outcome, "retryable");
    assert_eq!(response.reason.as_deref(), Some("resource-exhausted"));
    assert_eq!(fixture.workspaces_left(), 0);
}

#[test]
fn processing_budget_reserves_the_kill_grace() {
    let mut fixture = Fixture::new();
    fixture.config.safety_margin = Duration::from_millis(300);
    fixture.config.term_grace = Duration::from_millis(900);
    let marker = fixture._dir.path().join("tool-ran");
    fixture.write_stub("ffmpeg", &format!("touch {}", marker.display()));
    fixture.seed_mp4("clip.mov", 4 * 1024);

    // A 1s budget clears the 300ms staging margin, but processing cannot
    // also cover the 900ms kill grace: the tool must never start.
    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(1),
    );

    assert_eq!(response.outcome, "retryable");
    assert_eq!(response.reason.as_deref(), Some("timeout"));
    assert!(!marker.exists(), "tool ran without budget for its kill grace");
    assert_eq!(fixture.workspaces_left(), 0);
}

#[test]
fn oversized_transform_output_is_resource_exhausted() {
    let mut fixture = Fixture::new();
    fixture.config.quota_bytes = 32 * 1024;
    // 4 KiB input fits; the 64 KiB output alone overruns the quota.
    fixture.write_stub(
        "ffmpeg",
        r#"for a in "$@"; do out="$a"; done
dd if=/dev/zero of="$out" bs=1024 count=64 2>/dev/null"#,
    );
    fixture.seed_mp4("clip.mov", 4 * 1024);

    let response = handle_invocation(
        &fixture.config,
        &fixture.store,
        &event("transcode-720p"),
        Duration::from_secs(30),
    );

    assert_eq!(response.outcome, "retryable");
    assert_eq!(response.reason.as_deref(), Some("resource-exhausted"));
    assert!(!fixture.store.exists("out/clip-720p.mp4").unwrap());
    assert_eq!(fixture.workspaces_left(), 0);
}

#[test]
fn every_failure_path_releases_the_workspace() {
    // Sweep the scripted failure modes and assert the no-leak property for
    // each of them in one place.
    let cases: &[(&str, &str)] = &[
        ("exit 2", "processing stub failure"),
        ("kill -9 $$", "signal death"),
        ("sleep 60", "deadline overrun"),
        ("echo 'Header missing' >&2\nexit 1", "malformed input"),
    ];
    for (script, label) in cases {
        let fixture = Fixture::new();
        fixture.write_stub("ffmpeg", script);
        fixture.seed_mp4("clip.mov", 4 * 1024);

        let response = handle_invocation(
            &fixture.config,
            &fixture.store,
            &event("transcode-720p"),
            Duration::from_secs(1),
        );
        assert_ne!(response.outcome, "success", "{label}");
        assert_eq!(fixture.workspaces_left(), 0, "{label}");
    }
}
