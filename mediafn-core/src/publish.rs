//! Artifact publishing with at-most-once observable effect.
//!
//! The event platform delivers at least once, so the same invocation can run
//! twice. The artifact key is derived deterministically from the input
//! reference and profile, and publishing is a check-then-write-if-absent:
//! a replayed invocation finds the earlier artifact and reports it instead
//! of writing a second one.

use crate::error::{CoreError, CoreResult};
use crate::event::MediaProfile;
use crate::storage::ObjectStore;
use crate::utils::format_bytes;
use std::path::Path;

/// Deterministic artifact key: destination prefix, input stem, profile
/// suffix and extension. `out/` + `clip.mov` + 720p -> `out/clip-720p.mp4`.
pub fn artifact_key(destination: &str, input_ref: &str, profile: MediaProfile) -> String {
    let stem = Path::new(input_ref)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("artifact");

    let prefix = destination.trim_end_matches('/');
    let name = format!(
        "{stem}-{}.{}",
        profile.artifact_suffix(),
        profile.artifact_extension()
    );
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}

/// Makes `artifact` durably available under `key`.
///
/// Returns the artifact reference; a `Success` outcome built from it implies
/// the object is readable at that reference. Upload faults surface as
/// `PublishFailed` (retryable) rather than a partial success.
pub fn publish(store: &dyn ObjectStore, artifact: &Path, key: &str) -> CoreResult<String> {
    let already_present = store
        .exists(key)
        .map_err(|e| CoreError::PublishFailed(e.to_string()))?;
    if already_present {
        log::info!("artifact already present at {key}, skipping upload");
        return Ok(key.to_string());
    }

    let size = std::fs::metadata(artifact).map(|m| m.len()).unwrap_or(0);
    store
        .put(artifact, key)
        .map_err(|e| CoreError::PublishFailed(e.to_string()))?;
    log::info!("published {} ({}) to {key}", artifact.display(), format_bytes(size));
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalObjectStore;

    #[test]
    fn key_derivation_matches_the_naming_scheme() {
        assert_eq!(
            artifact_key("out/", "clip.mov", MediaProfile::Transcode720p),
            "out/clip-720p.mp4"
        );
        assert_eq!(
            artifact_key("out", "videos/clip.mov", MediaProfile::Transcode1080p),
            "out/clip-1080p.mp4"
        );
        assert_eq!(
            artifact_key("", "clip.mov", MediaProfile::Probe),
            "clip-probe.json"
        );
        assert_eq!(
            artifact_key("out/", "", MediaProfile::Probe),
            "out/artifact-probe.json"
        );
    }

    #[test]
    fn publish_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("store"));

        let first = dir.path().join("first.mp4");
        std::fs::write(&first, b"first artifact").unwrap();
        let key = artifact_key("out/", "clip.mov", MediaProfile::Transcode720p);

        let reference = publish(&store, &first, &key).unwrap();
        assert_eq!(reference, "out/clip-720p.mp4");

        // Replay with different local bytes: the earlier artifact wins and
        // no second object appears.
        let second = dir.path().join("second.mp4");
        std::fs::write(&second, b"replayed artifact").unwrap();
        let reference_again = publish(&store, &second, &key).unwrap();
        assert_eq!(reference_again, reference);

        let mut contents = Vec::new();
        use std::io::Read;
        store
            .fetch(&key)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"first artifact");

        let out_dir = dir.path().join("store").join("out");
        assert_eq!(std::fs::read_dir(out_dir).unwrap().count(), 1);
    }
}
