//! Input staging: fetch the referenced object into the workspace and
//! validate it before any tool process is spawned.
//!
//! The staged copy is written in fixed-size chunks counted against the
//! workspace quota, and the media kind is decided by content inspection.
//! A filename extension is never trusted: `clip.mov` full of text bytes is
//! rejected here, not three stages later by the encoder.

use crate::error::{CoreError, CoreResult};
use crate::storage::{ObjectStore, StoreError};
use crate::utils::format_bytes;
use crate::workspace::Workspace;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How many leading bytes are inspected to decide the media kind.
const SNIFF_LEN: usize = 512;

/// Copy chunk size for streaming the source object to disk.
const COPY_CHUNK: usize = 64 * 1024;

/// Media container kinds recognized by content inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// ISO BMFF: MP4 and QuickTime .mov.
    Mp4,
    /// Matroska and WebM (EBML header).
    Matroska,
    Avi,
    MpegTs,
    MpegPs,
    Mp3,
    Wav,
    Flac,
    Ogg,
}

impl MediaKind {
    /// Kinds accepted when no allow-list is configured.
    pub fn default_allowed() -> &'static [MediaKind] {
        &[
            MediaKind::Mp4,
            MediaKind::Matroska,
            MediaKind::Avi,
            MediaKind::MpegTs,
            MediaKind::MpegPs,
            MediaKind::Mp3,
            MediaKind::Wav,
            MediaKind::Flac,
            MediaKind::Ogg,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            MediaKind::Mp4 => "mp4",
            MediaKind::Matroska => "matroska",
            MediaKind::Avi => "avi",
            MediaKind::MpegTs => "mpegts",
            MediaKind::MpegPs => "mpegps",
            MediaKind::Mp3 => "mp3",
            MediaKind::Wav => "wav",
            MediaKind::Flac => "flac",
            MediaKind::Ogg => "ogg",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MediaKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp4" | "mov" => Ok(MediaKind::Mp4),
            "matroska" | "mkv" | "webm" => Ok(MediaKind::Matroska),
            "avi" => Ok(MediaKind::Avi),
            "mpegts" => Ok(MediaKind::MpegTs),
            "mpegps" => Ok(MediaKind::MpegPs),
            "mp3" => Ok(MediaKind::Mp3),
            "wav" => Ok(MediaKind::Wav),
            "flac" => Ok(MediaKind::Flac),
            "ogg" => Ok(MediaKind::Ogg),
            _ => Err(()),
        }
    }
}

/// A validated local copy of the source media.
#[derive(Debug)]
pub struct StagedInput {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub kind: MediaKind,
}

/// Fetches `reference` from the store into the workspace and validates it.
///
/// Fails with `InvalidInput` on a missing object, quota overrun, or an
/// unrecognized/disallowed media kind; with `TransientFetch` on source I/O
/// faults worth retrying.
pub fn stage(
    store: &dyn ObjectStore,
    reference: &str,
    workspace: &Workspace,
    allowed: &[MediaKind],
) -> CoreResult<StagedInput> {
    let mut reader = store.fetch(reference).map_err(fetch_error)?;
    let path = staged_path(workspace, reference);

    let size_bytes = copy_within_quota(&mut *reader, &path, workspace.quota_bytes())
        .map_err(|e| {
            let _ = std::fs::remove_file(&path);
            e
        })?;

    let kind = inspect_kind(&path)?;
    if !allowed.contains(&kind) {
        let _ = std::fs::remove_file(&path);
        return Err(CoreError::InvalidInput(format!(
            "media kind {kind} is not in the allow-list"
        )));
    }

    log::info!(
        "staged {reference} as {} ({}, {kind})",
        path.display(),
        format_bytes(size_bytes),
    );
    Ok(StagedInput { path, size_bytes, kind })
}

/// Local name for the staged copy. The original extension is kept when it is
/// plain alphanumeric (useful in logs and harmless to the tool, which goes
/// by content); everything else of the reference is discarded.
fn staged_path(workspace: &Workspace, reference: &str) -> PathBuf {
    let extension = Path::new(reference)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match extension {
        Some(ext) => workspace.path().join(format!("input.{ext}")),
        None => workspace.path().join("input"),
    }
}

fn fetch_error(err: StoreError) -> CoreError {
    match err {
        StoreError::NotFound(reference) => {
            CoreError::InvalidInput(format!("input object not found: {reference}"))
        }
        StoreError::InvalidReference(reference) => {
            CoreError::InvalidInput(format!("invalid input reference: {reference}"))
        }
        StoreError::Transient(message) => CoreError::TransientFetch(message),
    }
}

fn copy_within_quota(reader: &mut dyn Read, dest: &Path, quota: u64) -> CoreResult<u64> {
    let mut file = File::create(dest)?;
    let mut buf = [0u8; COPY_CHUNK];
    let mut copied: u64 = 0;

    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| CoreError::TransientFetch(format!("read from source: {e}")))?;
        if n == 0 {
            break;
        }
        copied += n as u64;
        if copied > quota {
            return Err(CoreError::InvalidInput(format!(
                "input exceeds workspace quota of {}",
                format_bytes(quota)
            )));
        }
        file.write_all(&buf[..n])?;
    }

    file.flush()?;
    Ok(copied)
}

fn inspect_kind(path: &Path) -> CoreResult<MediaKind> {
    let mut header = vec![0u8; SNIFF_LEN];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    header.truncate(filled);

    sniff_media_kind(&header).ok_or_else(|| {
        CoreError::InvalidInput("content does not match any recognized media kind".to_string())
    })
}

/// Decides the media kind from leading bytes, or `None` when nothing
/// matches. Signatures cover the containers in [`MediaKind`].
pub fn sniff_media_kind(header: &[u8]) -> Option<MediaKind> {
    if header.len() >= 12 && (&header[4..8] == b"ftyp" || &header[4..8] == b"moov" || &header[4..8] == b"wide") {
        return Some(MediaKind::Mp4);
    }
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(MediaKind::Matroska);
    }
    if header.len() >= 12 && header.starts_with(b"RIFF") {
        if &header[8..12] == b"AVI " {
            return Some(MediaKind::Avi);
        }
        if &header[8..12] == b"WAVE" {
            return Some(MediaKind::Wav);
        }
        return None;
    }
    if header.starts_with(&[0x00, 0x00, 0x01, 0xBA]) {
        return Some(MediaKind::MpegPs);
    }
    // Transport stream: sync byte repeating at the 188-byte packet boundary.
    if header.len() > 188 && header[0] == 0x47 && header[188] == 0x47 {
        return Some(MediaKind::MpegTs);
    }
    if header.starts_with(b"ID3") {
        return Some(MediaKind::Mp3);
    }
    if header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0 {
        return Some(MediaKind::Mp3);
    }
    if header.starts_with(b"fLaC") {
        return Some(MediaKind::Flac);
    }
    if header.starts_with(b"OggS") {
        return Some(MediaKind::Ogg);
    }
    None
}
