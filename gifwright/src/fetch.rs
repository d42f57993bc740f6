//! Retrieval of frame images from URLs the blob store does not own.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::config::FetchConfig;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("response is larger than {limit} bytes")]
    TooLarge { limit: usize },

    #[error("fetching from remote URLs is disabled")]
    RemoteDisabled,
}

/// Source of image bytes for URLs outside the blob store
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// Fetches images over HTTP(S) with a timeout and a body size cap
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("gifwright/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let limit = self.max_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(FetchError::TooLarge { limit });
        }

        // Content-Length can be absent or wrong; enforce the cap while reading
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(bytes = body.len(), "Fetched remote image");
        Ok(body.freeze())
    }
}

/// Refuses every request; installed when `fetch.allow_remote` is off
pub struct DisabledFetcher;

#[async_trait]
impl ImageFetcher for DisabledFetcher {
    async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
        Err(FetchError::RemoteDisabled)
    }
}

pub fn create_fetcher(config: &FetchConfig) -> Result<Arc<dyn ImageFetcher>, FetchError> {
    if config.allow_remote {
        Ok(Arc::new(HttpFetcher::new(config)?))
    } else {
        tracing::info!("Remote image fetching disabled; only stored blobs can be animated");
        Ok(Arc::new(DisabledFetcher))
    }
}
