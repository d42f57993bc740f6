use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::{BlobStore, Result, StorageError, is_valid_key};

/// Local filesystem storage backend - stores blobs in a sharded directory tree.
///
/// Writes are staged in a temporary file next to the destination and renamed into place, so a
/// reader never observes a partially written blob. The staging file is removed on every exit path:
/// an early return or a dropped future deletes it, only a completed write persists it.
pub struct LocalBlobStore {
    base_path: PathBuf,
    public_base_url: Url,
}

impl LocalBlobStore {
    pub fn new(base_path: PathBuf, public_base_url: Url) -> Self {
        Self {
            base_path,
            public_base_url,
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(&key[..2]).join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, content: Bytes, _content_type: &str) -> Result<String> {
        let full_path = self.path_for(key)?;
        let shard = full_path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?
            .to_path_buf();
        tokio::fs::create_dir_all(&shard).await?;

        let staged = tempfile::Builder::new().prefix(".staging-").tempfile_in(&shard)?;
        let mut file = tokio::fs::File::from_std(staged.as_file().try_clone()?);
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        staged.persist(&full_path).map_err(|e| StorageError::Io(e.error))?;
        tracing::debug!(key = %key, bytes = content.len(), "Stored blob on local filesystem");

        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let full_path = match self.path_for(key) {
            Ok(path) => path,
            Err(_) => return Err(StorageError::NotFound),
        };

        match tokio::fs::read(&full_path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.path_for(key)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.path_for(key) {
            Ok(path) => Ok(tokio::fs::try_exists(path).await?),
            Err(_) => Ok(false),
        }
    }

    fn public_base_url(&self) -> &Url {
        &self.public_base_url
    }
}
