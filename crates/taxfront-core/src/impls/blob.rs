//! Blob store adapters.
//!
//! - `InMemoryBlobStore`: tests; blobs are put by path
//! - `FsBlobStore`: a local directory standing in for the bucket

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::BlobError;
use crate::ports::BlobStore;

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.lock().await.insert(path.into(), bytes.into());
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn download_to(&self, path: &str, dest: &Path) -> Result<(), BlobError> {
        // copy out before touching the filesystem; don't hold the lock across io
        let bytes = {
            let blobs = self.blobs.lock().await;
            blobs
                .get(path)
                .cloned()
                .ok_or_else(|| BlobError::NotFound(path.to_string()))?
        };
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }
}

/// Serves blobs from files below `root`.
#[derive(Debug, Clone)]
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

    /// Map a bucket path to a file under `root`. Absolute paths and `..` are refused.
    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        let rel = Path::new(path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(BlobError::NotFound(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn download_to(&self, path: &str, dest: &Path) -> Result<(), BlobError> {
        let src = self.resolve(path)?;
        match tokio::fs::copy(&src, dest).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(path.to_string()))
            }
            Err(e) => Err(BlobError::Io(e)),
        }
    }
}
