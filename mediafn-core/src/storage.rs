//! Object store abstraction.
//!
//! The event source hands mediafn opaque object references; this module
//! defines the seam through which they are fetched and artifacts are
//! published. Consumers inject their own implementation (an S3-style store
//! in production); [`LocalObjectStore`] backs local runs and tests with a
//! directory tree.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by an object store.
///
/// `NotFound` is distinguishable from `Transient` so the stager can report a
/// missing object as a caller error rather than something worth retrying.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object reference: {0}")]
    InvalidReference(String),

    #[error("transient store error: {0}")]
    Transient(String),
}

/// Blob storage collaborator: fetch inputs, publish artifacts.
///
/// A successful `put` must leave the object immediately readable by
/// downstream consumers.
pub trait ObjectStore {
    /// Opens the referenced object for streaming reads.
    fn fetch(&self, reference: &str) -> Result<Box<dyn Read + Send>, StoreError>;

    /// Reports whether an object already exists at `reference`.
    fn exists(&self, reference: &str) -> Result<bool, StoreError>;

    /// Writes the file at `source` to `reference`, creating intermediate
    /// prefixes as needed.
    fn put(&self, source: &Path, reference: &str) -> Result<(), StoreError>;
}

/// Filesystem-backed object store rooted at a directory.
///
/// References are slash-separated keys relative to the root; traversal
/// outside the root is rejected.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(reference);
        if reference.is_empty() || relative.is_absolute() {
            return Err(StoreError::InvalidReference(reference.to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StoreError::InvalidReference(reference.to_string())),
            }
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn fetch(&self, reference: &str) -> Result<Box<dyn Read + Send>, StoreError> {
        let path = self.resolve(reference)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(reference.to_string()))
            }
            Err(e) => Err(StoreError::Transient(format!("open {reference}: {e}"))),
        }
    }

    fn exists(&self, reference: &str) -> Result<bool, StoreError> {
        let path = self.resolve(reference)?;
        Ok(path.is_file())
    }

    fn put(&self, source: &Path, reference: &str) -> Result<(), StoreError> {
        let dest = self.resolve(reference)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::Transient(format!("create prefix for {reference}: {e}")))?;
        }
        fs::copy(source, &dest)
            .map_err(|e| StoreError::Transient(format!("write {reference}: {e}")))?;
        Ok(())
    }
}
