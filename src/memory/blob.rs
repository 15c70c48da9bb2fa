//! Keyed blob storage backing the memory vault.
//!
//! The vault only needs a string store addressable by fixed keys. The
//! filesystem implementation maps each key to a file under a root directory;
//! the in-memory implementation backs unit tests and embedding hosts that
//! manage persistence themselves.

use crate::error::{Result, SessionError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// A string store addressable by key. Implementations must treat a missing
/// key as `Ok(None)`, not an error.
pub trait BlobStore: Send + Sync {
    /// Read the blob stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any existing blob.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the blob under `key`. Removing a missing key is a no-op.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed blob store: each key is a file under `root`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::Persistence(format!(
                "cannot read blob '{key}': {e}"
            ))),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            SessionError::Persistence(format!("cannot create vault directory: {e}"))
        })?;
        std::fs::write(self.path_for(key), value)
            .map_err(|e| SessionError::Persistence(format!("cannot write blob '{key}': {e}")))
    }

    fn delete(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Persistence(format!(
                "cannot delete blob '{key}': {e}"
            ))),
        }
    }
}

/// In-memory blob store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| SessionError::Persistence("blob store lock poisoned".into()))?;
        Ok(blobs.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| SessionError::Persistence("blob store lock poisoned".into()))?;
        blobs.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| SessionError::Persistence("blob store lock poisoned".into()))?;
        blobs.remove(key);
        Ok(())
    }
}
