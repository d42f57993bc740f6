//! Secondary copy of produced animations.
//!
//! The archive is optional. When it is configured, the animation pipeline writes every finished
//! animation to it after the primary store has accepted the same bytes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::StorageConfig;
use crate::storage::{self, BlobStore, StorageError};

#[async_trait]
pub trait Archive: Send + Sync {
    /// Persist a copy of `content` under `key`; returns where the copy lives
    async fn archive(&self, key: &str, content: Bytes, content_type: &str) -> Result<String, StorageError>;
}

/// Archive backed by any [`BlobStore`]
pub struct BlobArchive {
    store: Arc<dyn BlobStore>,
}

impl BlobArchive {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Archive for BlobArchive {
    async fn archive(&self, key: &str, content: Bytes, content_type: &str) -> Result<String, StorageError> {
        let location = self.store.put(key, content, content_type).await?;
        tracing::info!(key = %key, location = %location, "Archived animation");
        Ok(location)
    }
}

pub async fn create_archive(config: Option<&StorageConfig>) -> Result<Option<Arc<dyn Archive>>, StorageError> {
    match config {
        Some(config) => {
            let store = storage::create_blob_store(config).await?;
            Ok(Some(Arc::new(BlobArchive::new(store))))
        }
        None => Ok(None),
    }
}
