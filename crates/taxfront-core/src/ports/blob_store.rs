//! BlobStore port - uploaded documents (Cloud Storage bucket or local directory).

use std::path::Path;

use async_trait::async_trait;

use crate::domain::BlobError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download the blob at `path` (bucket-relative) into `dest`, replacing its contents.
    async fn download_to(&self, path: &str, dest: &Path) -> Result<(), BlobError>;
}
