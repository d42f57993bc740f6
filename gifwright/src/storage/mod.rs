//! Durable blob storage for uploaded images and produced animations.
//!
//! Every backend implements [`BlobStore`]: a name-addressed object store that returns a public URL
//! on write. Keys are always generated by [`generate_key`] (a fresh UUID plus a lowercase
//! extension), never taken from user input, so concurrent requests cannot overwrite each other.
//!
//! Backends:
//! - [`local::LocalBlobStore`] - sharded directory on the local filesystem
//! - [`s3::S3BlobStore`] - S3-compatible object storage
//! - [`memory::InMemoryBlobStore`] - process-local map, for development and tests

pub mod local;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::config::StorageConfig;

/// Errors produced by blob storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// No blob is stored under the requested key
    #[error("Blob not found")]
    NotFound,

    /// The key does not have the shape produced by [`generate_key`]
    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    /// Filesystem error from a local backend
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for backend failures (network, SDK, ...)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for blob storage backends.
///
/// Implementations must be safe to call concurrently from many workers; no caller holds a lock
/// around them.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `content` under `key` and return the public URL of the stored object
    async fn put(&self, key: &str, content: Bytes, content_type: &str) -> Result<String>;

    /// Retrieve the content stored under `key`
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Delete the content stored under `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether `key` is present
    async fn exists(&self, key: &str) -> Result<bool>;

    /// URL prefix under which this store's keys are reachable
    fn public_base_url(&self) -> &Url;

    /// Public URL for `key`
    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url().as_str().trim_end_matches('/'), key)
    }

    /// Recover the key from a URL previously returned by [`BlobStore::put`].
    ///
    /// Returns `None` for URLs that point elsewhere; those have to be fetched over the network.
    fn key_for_url(&self, url: &str) -> Option<String> {
        let base = self.public_base_url().as_str().trim_end_matches('/');
        let key = url.strip_prefix(base)?.strip_prefix('/')?;
        is_valid_key(key).then(|| key.to_string())
    }
}

/// Generate a collision-resistant key with the given extension, e.g. `7f9c...-....png`
pub fn generate_key(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), extension.to_ascii_lowercase())
}

/// True if `key` has the `<uuid>.<ext>` shape produced by [`generate_key`].
///
/// Backends refuse any other key, which also rules out path traversal on the filesystem backend.
pub fn is_valid_key(key: &str) -> bool {
    let Some((stem, extension)) = key.split_once('.') else {
        return false;
    };
    Uuid::parse_str(stem).is_ok()
        && !extension.is_empty()
        && extension.len() <= 8
        && extension.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Create a blob store backend based on configuration
pub async fn create_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    let public_base_url = Url::parse(config.public_base_url())
        .map_err(|e| StorageError::Other(anyhow::anyhow!("Invalid public_base_url {:?}: {}", config.public_base_url(), e)))?;

    match config {
        StorageConfig::Local { path, .. } => {
            tracing::info!("Creating local blob store (path: {:?})", path);
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| StorageError::Other(anyhow::anyhow!("Failed to create local storage directory {:?}: {}", path, e)))?;
            Ok(Arc::new(local::LocalBlobStore::new(path.clone(), public_base_url)))
        }
        StorageConfig::S3 {
            bucket,
            region,
            endpoint,
            prefix,
            ..
        } => {
            tracing::info!(bucket = %bucket, endpoint = ?endpoint, "Creating S3 blob store");
            let store = s3::S3BlobStore::new(bucket.clone(), region.clone(), endpoint.clone(), prefix.clone(), public_base_url).await;
            Ok(Arc::new(store))
        }
        StorageConfig::Memory { .. } => {
            tracing::warn!("Creating in-memory blob store; stored blobs are lost on restart");
            Ok(Arc::new(memory::InMemoryBlobStore::new(public_base_url)))
        }
    }
}
