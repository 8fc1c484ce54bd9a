// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inkproof-artifacts
//!
//! The artifact store adapter: put/get/presign of immutable blobs in named
//! buckets. [`FsArtifactStore`] backs buckets with directories and objects
//! with files, suitable for single-node deployments and tests; a real
//! object-store-backed implementation (S3/minio) would satisfy the same
//! [`ArtifactStore`] trait.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Errors returned by [`ArtifactStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The requested object does not exist in the given bucket.
    #[error("object {bucket}/{key} not found")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },
    /// A key attempted to escape its bucket directory (e.g. via `..` or a
    /// leading `/`).
    #[error("object key {0:?} is not a valid relative path")]
    InvalidKey(String),
    /// An underlying I/O operation failed.
    #[error("artifact store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Put/get/presign adapter over named buckets of immutable blobs.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Ensure `bucket` exists, creating it if necessary.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), ArtifactError>;

    /// Write `size` bytes read from `reader` to `bucket/key`. `content_type`
    /// is accepted for interface parity with real object stores but is not
    /// otherwise interpreted by the filesystem-backed implementation.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        content_type: &str,
    ) -> Result<(), ArtifactError>;

    /// Read the full contents of `bucket/key`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Return the size in bytes of `bucket/key`.
    async fn stat(&self, bucket: &str, key: &str) -> Result<u64, ArtifactError>;

    /// Return a URL the object can be fetched from within `ttl`.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ArtifactError>;
}

/// Filesystem-backed [`ArtifactStore`]: buckets are subdirectories of `root`,
/// objects are files named after their key.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    download_base_url: String,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. `download_base_url` is prefixed onto
    /// presigned URLs, since there is no external object store to presign
    /// against; the intake's own download route serves the result.
    pub fn new(root: impl Into<PathBuf>, download_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            download_base_url: download_base_url.into(),
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, ArtifactError> {
        if !is_safe_relative_path(key) {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

fn is_safe_relative_path(path: &str) -> bool {
    let p = Path::new(path);
    if p.is_absolute() {
        return false;
    }
    p.components()
        .all(|c| matches!(c, Component::Normal(_)))
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), ArtifactError> {
        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        content_type: &str,
    ) -> Result<(), ArtifactError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        let written = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        debug!(bucket, key, size, written, content_type, "wrote artifact");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.object_path(bucket, key)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, bucket, key))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<u64, ArtifactError> {
        let path = self.object_path(bucket, key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(e, bucket, key))?;
        Ok(meta.len())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ArtifactError> {
        // No external object store to presign against; the caller's own
        // download route serves the file, so the "presigned" URL is just a
        // deterministic pointer at it. ttl is unused here but kept in the
        // trait for parity with a real S3/minio-backed implementation.
        let _ = ttl;
        if !is_safe_relative_path(key) {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        Ok(format!("{}/{bucket}/{key}", self.download_base_url))
    }
}

fn not_found_or_io(e: std::io::Error, bucket: &str, key: &str) -> ArtifactError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ArtifactError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        ArtifactError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn store() -> (FsArtifactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path(), "http://localhost:8089/download");
        (store, dir)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (store, _dir) = store();
        store.ensure_bucket("compiled-pdfs").await.unwrap();
        let mut reader = Cursor::new(b"%PDF-1.5 fake".to_vec());
        store
            .put("compiled-pdfs", "job-1.pdf", &mut reader, 13, "application/pdf")
            .await
            .unwrap();

        let bytes = store.get("compiled-pdfs", "job-1.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.5 fake");
        assert_eq!(store.stat("compiled-pdfs", "job-1.pdf").await.unwrap(), 13);
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let (store, _dir) = store();
        store.ensure_bucket("compiled-pdfs").await.unwrap();
        let err = store.get("compiled-pdfs", "missing.pdf").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rejects_path_traversal_keys() {
        let (store, _dir) = store();
        let mut reader = Cursor::new(b"x".to_vec());
        let err = store
            .put("compiled-pdfs", "../../etc/passwd", &mut reader, 1, "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidKey(_)));

        let err = store.get("compiled-pdfs", "/etc/passwd").await.unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn presign_get_returns_download_url() {
        let (store, _dir) = store();
        let url = store
            .presign_get("compiled-pdfs", "job-1.pdf", Duration::from_secs(900))
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:8089/download/compiled-pdfs/job-1.pdf");
    }
}
