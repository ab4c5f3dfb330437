//! File-backed credential store with an in-process cache.
//!
//! A successful save updates the file first and the cache only after
//! the write succeeds, so the two copies never disagree. A missing
//! file is absence, not an error; callers can tell "no credential yet"
//! from a real read failure.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Single opaque API key, persisted to a well-known local file.
pub struct CredentialStore {
    path: PathBuf,
    cache: RwLock<Option<String>>,
}

impl CredentialStore {
    /// Store backed by `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the key. The cache is updated only when the write
    /// succeeds; a failed save leaves both copies untouched.
    pub async fn save(&self, key: &str) -> Result<(), std::io::Error> {
        if let Err(err) = tokio::fs::write(&self.path, key).await {
            warn!(path = %self.path.display(), error = %err, "could not write credential file");
            return Err(err);
        }
        *self.cache.write() = Some(key.to_string());
        Ok(())
    }

    /// Read the key: cache first, then the backing file. `Ok(None)`
    /// means no credential has been saved yet.
    pub async fn load(&self) -> Result<Option<String>, std::io::Error> {
        if let Some(cached) = self.cache.read().clone() {
            return Ok(Some(cached));
        }
        match tokio::fs::read_to_string(&self.path).await {
            Ok(key) => {
                *self.cache.write() = Some(key.clone());
                Ok(Some(key))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Cached value without touching the filesystem.
    pub fn cached(&self) -> Option<String> {
        self.cache.read().clone()
    }
}
