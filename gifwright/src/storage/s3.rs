use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use url::Url;

use super::{BlobStore, Result, StorageError, is_valid_key};

/// S3-compatible object storage backend.
///
/// Credentials come from the standard AWS provider chain (env vars, profile, instance metadata).
/// Setting `endpoint` targets S3-compatible services such as MinIO and switches to path-style
/// addressing.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
    public_base_url: Url,
}

impl S3BlobStore {
    pub async fn new(bucket: String, region: Option<String>, endpoint: Option<String>, prefix: Option<String>, public_base_url: Url) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region));
        }
        let shared_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket,
            prefix: prefix.map(|p| p.trim_matches('/').to_string()).filter(|p| !p.is_empty()),
            public_base_url,
        }
    }

    fn object_key(&self, key: &str) -> Result<String> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[tracing::instrument(skip(self, content), fields(bucket = %self.bucket, bytes = content.len()))]
    async fn put(&self, key: &str, content: Bytes, content_type: &str) -> Result<String> {
        let object_key = self.object_key(key)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_type(content_type)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| StorageError::Other(anyhow::anyhow!("put_object {} failed: {}", object_key, DisplayErrorContext(&e))))?;

        Ok(self.url_for(key))
    }

    #[tracing::instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let Ok(object_key) = self.object_key(key) else {
            return Err(StorageError::NotFound);
        };

        let output = match self.client.get_object().bucket(&self.bucket).key(&object_key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => return Err(StorageError::NotFound),
            Err(e) => {
                return Err(StorageError::Other(anyhow::anyhow!(
                    "get_object {} failed: {}",
                    object_key,
                    DisplayErrorContext(&e)
                )));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Other(anyhow::anyhow!("reading body of {} failed: {}", object_key, e)))?;

        Ok(data.into_bytes())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let object_key = self.object_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| StorageError::Other(anyhow::anyhow!("delete_object {} failed: {}", object_key, DisplayErrorContext(&e))))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let Ok(object_key) = self.object_key(key) else {
            return Ok(false);
        };

        match self.client.head_object().bucket(&self.bucket).key(&object_key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::Other(anyhow::anyhow!(
                "head_object {} failed: {}",
                object_key,
                DisplayErrorContext(&e)
            ))),
        }
    }

    fn public_base_url(&self) -> &Url {
        &self.public_base_url
    }
}
