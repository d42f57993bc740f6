use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use url::Url;

use super::{BlobStore, Result, StorageError, is_valid_key};

/// A stored blob and the content type it was written with
#[derive(Debug, Clone)]
pub struct MemoryBlob {
    pub content: Bytes,
    pub content_type: String,
}

/// In-memory blob store.
///
/// Nothing survives a restart; intended for development and tests.
pub struct InMemoryBlobStore {
    blobs: DashMap<String, MemoryBlob>,
    public_base_url: Url,
}

impl InMemoryBlobStore {
    pub fn new(public_base_url: Url) -> Self {
        Self {
            blobs: DashMap::new(),
            public_base_url,
        }
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Content type recorded for `key`, if present
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.blobs.get(key).map(|blob| blob.content_type.clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, content: Bytes, content_type: &str) -> Result<String> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        self.blobs.insert(
            key.to_string(),
            MemoryBlob {
                content,
                content_type: content_type.to_string(),
            },
        );
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.blobs
            .get(key)
            .map(|blob| blob.content.clone())
            .ok_or(StorageError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.contains_key(key))
    }

    fn public_base_url(&self) -> &Url {
        &self.public_base_url
    }
}
