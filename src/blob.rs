//! Durable blob storage for index snapshots.
//!
//! [`BlobStore`] is the seam to whatever object store backs a deployment. The
//! filesystem implementation keeps one file per key under a root directory and writes
//! through a temp file plus rename, so a crash mid-upload never leaves a torn blob.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub trait BlobStore: Send + Sync {
    /// Fetch a blob. `Ok(None)` means the key does not exist.
    fn download(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a blob, replacing any existing value under `key`.
    fn upload(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Blob store backed by a local directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::validation(format!("invalid blob key: {key:?}")));
        }
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    fn download(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StorageUnavailable {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn upload(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let unavailable = |e: std::io::Error| Error::StorageUnavailable {
            key: key.to_string(),
            reason: e.to_string(),
        };

        std::fs::create_dir_all(&self.root).map_err(unavailable)?;
        let tmp_path = self.root.join(format!(".{key}.tmp"));
        std::fs::write(&tmp_path, bytes).map_err(unavailable)?;
        std::fs::rename(&tmp_path, &path).map_err(unavailable)?;

        tracing::debug!(key, bytes = bytes.len(), "blob uploaded");
        Ok(())
    }
}
