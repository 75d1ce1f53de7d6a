//! Per-invocation ephemeral workspace management.
//!
//! Each invocation owns exactly one workspace directory with a byte quota.
//! Release is idempotent and also runs on drop, so the directory is
//! reclaimed on every exit path, including panics partway through an
//! invocation.

use crate::error::{CoreError, CoreResult};
use crate::utils::format_bytes;
use std::path::{Path, PathBuf};
use tempfile::{Builder as TempFileBuilder, TempDir};

/// Exclusively owned, invocation-scoped directory with a byte quota.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    quota_bytes: u64,
}

impl Workspace {
    /// Allocates a private workspace under `root`.
    ///
    /// Fails with `ResourceExhausted` when the filesystem hosting `root`
    /// reports less free space than the requested quota.
    pub fn acquire(root: &Path, quota_bytes: u64) -> CoreResult<Self> {
        std::fs::create_dir_all(root)?;

        if let Some(available) = available_bytes(root) {
            if available < quota_bytes {
                return Err(CoreError::ResourceExhausted(format!(
                    "{} available under {}, quota is {}",
                    format_bytes(available),
                    root.display(),
                    format_bytes(quota_bytes),
                )));
            }
        }

        let dir = TempFileBuilder::new().prefix("mediafn_").tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        log::debug!("acquired workspace {} (quota {})", path.display(), format_bytes(quota_bytes));

        Ok(Self {
            dir: Some(dir),
            path,
            quota_bytes,
        })
    }

    /// The workspace directory. Only meaningful before release.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Total bytes currently stored in the workspace tree, staged input and
    /// produced output alike. Only meaningful before release.
    pub fn usage_bytes(&self) -> std::io::Result<u64> {
        fn tree_size(path: &Path) -> std::io::Result<u64> {
            let mut total = 0;
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                if metadata.is_dir() {
                    total += tree_size(&entry.path())?;
                } else {
                    total += metadata.len();
                }
            }
            Ok(total)
        }
        tree_size(&self.path)
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Returns a path for a scratch file inside the workspace with a random
    /// suffix. Does not create the file.
    pub fn scratch_path(&self, prefix: &str, extension: &str) -> PathBuf {
        use rand::distributions::Alphanumeric;
        use rand::{thread_rng, Rng};

        let random_suffix: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();

        self.path.join(format!("{prefix}_{random_suffix}.{extension}"))
    }

    /// Removes the workspace directory and everything in it. Safe to call
    /// multiple times; later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => log::debug!("released workspace {}", path.display()),
                Err(e) => log::warn!("failed to remove workspace {}: {e}", path.display()),
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Free bytes available to unprivileged writers on the filesystem hosting
/// `path`, or `None` where that cannot be determined.
#[cfg(unix)]
fn available_bytes(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is a valid NUL-terminated string and stat is a valid
    // out-pointer for the duration of the call.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn available_bytes(_path: &Path) -> Option<u64> {
    None
}
