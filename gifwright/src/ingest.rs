//! Upload ingestion: validate a batch of named files and persist each one to the blob store.
//!
//! Validation only looks at the file name's extension and happens for the whole batch before any
//! store write. Accepted files are then written concurrently, one task per file, optionally bounded
//! by `ingest.max_concurrency`. Results always come back in the order the files were submitted,
//! whatever order the writes finish in.
//!
//! Two policies govern failure handling:
//! - [`IngestPolicy::FailFast`]: one invalid name rejects the whole batch without touching the store.
//!   A failed write aborts the outstanding writes and fails the batch.
//! - [`IngestPolicy::CollectAll`]: every file is attempted and reported individually.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::config::{IngestConfig, IngestPolicy};
use crate::errors::{Error, ErrorKind, Result};
use crate::metrics;
use crate::storage::{BlobStore, generate_key};

/// One uploaded file as received from the client
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub source_name: String,
    pub raw_bytes: Bytes,
}

impl UploadTask {
    pub fn new(source_name: impl Into<String>, raw_bytes: impl Into<Bytes>) -> Self {
        Self {
            source_name: source_name.into(),
            raw_bytes: raw_bytes.into(),
        }
    }
}

/// Outcome for one file of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Accepted {
        source_name: String,
        stored_url: String,
    },
    Rejected {
        source_name: String,
        reason: ErrorKind,
        message: String,
    },
}

impl ValidationResult {
    pub fn stored_url(&self) -> Option<&str> {
        match self {
            ValidationResult::Accepted { stored_url, .. } => Some(stored_url),
            ValidationResult::Rejected { .. } => None,
        }
    }
}

pub struct IngestCoordinator {
    store: Arc<dyn BlobStore>,
    config: IngestConfig,
}

impl IngestCoordinator {
    pub fn new(store: Arc<dyn BlobStore>, config: IngestConfig) -> Self {
        Self { store, config }
    }

    /// Check `source_name` against the extension allow-list; returns the lowercased extension
    pub fn validate(&self, source_name: &str) -> Result<String> {
        let extension = std::path::Path::new(source_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension {
            Some(ext) if self.config.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)) => Ok(ext),
            _ => Err(Error::UnsupportedFormat {
                source_name: source_name.to_string(),
                allowed: self.config.allowed_extensions.join(", "),
            }),
        }
    }

    /// Ingest a batch under the configured policy.
    ///
    /// Under fail-fast every result is `Accepted`; under collect-all the batch only fails as a whole
    /// when it is empty.
    #[instrument(skip_all, fields(batch_size = batch.len(), policy = ?self.config.policy))]
    pub async fn ingest(&self, batch: Vec<UploadTask>) -> Result<Vec<ValidationResult>> {
        if batch.is_empty() {
            return Err(Error::EmptyInput {
                what: "images".to_string(),
            });
        }

        let results = match self.config.policy {
            IngestPolicy::FailFast => self.ingest_fail_fast(batch).await,
            IngestPolicy::CollectAll => self.ingest_collect_all(batch).await,
        };

        match &results {
            Ok(results) => {
                let accepted = results.iter().filter(|r| r.stored_url().is_some()).count();
                metrics::record_ingest(accepted, results.len() - accepted);
                debug!(accepted, rejected = results.len() - accepted, "Batch ingested");
            }
            Err(e) => metrics::record_ingest_failure(e.kind()),
        }
        results
    }

    async fn ingest_fail_fast(&self, batch: Vec<UploadTask>) -> Result<Vec<ValidationResult>> {
        let mut jobs = Vec::with_capacity(batch.len());
        for (index, task) in batch.into_iter().enumerate() {
            let extension = self.validate(&task.source_name)?;
            jobs.push((index, task, extension));
        }

        let outcomes = self.store_all(jobs, true).await?;
        outcomes
            .into_iter()
            .map(|(source_name, outcome)| outcome.map(|stored_url| ValidationResult::Accepted { source_name, stored_url }))
            .collect()
    }

    async fn ingest_collect_all(&self, batch: Vec<UploadTask>) -> Result<Vec<ValidationResult>> {
        let mut results: Vec<Option<ValidationResult>> = vec![None; batch.len()];
        let mut jobs = Vec::with_capacity(batch.len());

        for (index, task) in batch.into_iter().enumerate() {
            match self.validate(&task.source_name) {
                Ok(extension) => jobs.push((index, task, extension)),
                Err(e) => results[index] = Some(rejected(task.source_name, &e)),
            }
        }

        let indices: Vec<usize> = jobs.iter().map(|(index, _, _)| *index).collect();
        let outcomes = self.store_all(jobs, false).await?;
        for (index, (source_name, outcome)) in indices.into_iter().zip(outcomes) {
            results[index] = Some(match outcome {
                Ok(stored_url) => ValidationResult::Accepted { source_name, stored_url },
                Err(e) => rejected(source_name, &e),
            });
        }

        results
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| Error::Internal {
                    operation: "ingest batch: a file produced no result".to_string(),
                })
            })
            .collect()
    }

    /// Write every job concurrently; the returned vector follows the order of `jobs`.
    ///
    /// With `fail_fast`, the first failed write aborts the remaining ones and is returned as the
    /// error. Aborted writes on the local backend discard their staging files.
    async fn store_all(&self, jobs: Vec<(usize, UploadTask, String)>, fail_fast: bool) -> Result<Vec<(String, Result<String>)>> {
        let semaphore = (self.config.max_concurrency > 0).then(|| Arc::new(Semaphore::new(self.config.max_concurrency)));
        let mut slots: Vec<Option<(String, Result<String>)>> = (0..jobs.len()).map(|_| None).collect();
        let mut workers = JoinSet::new();

        for (slot, (_index, task, extension)) in jobs.into_iter().enumerate() {
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            workers.spawn(async move {
                let UploadTask { source_name, raw_bytes } = task;
                let outcome = store_upload(store, semaphore, &source_name, raw_bytes, &extension).await;
                (slot, source_name, outcome)
            });
        }

        while let Some(joined) = workers.join_next().await {
            let (slot, source_name, outcome) = joined.map_err(|e| Error::Internal {
                operation: format!("join upload worker: {e}"),
            })?;

            if fail_fast && let Err(e) = outcome {
                warn!(file = %source_name, error = %e, "Upload failed; aborting batch");
                workers.abort_all();
                return Err(e);
            }
            slots[slot] = Some((source_name, outcome));
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| Error::Internal {
                    operation: "ingest batch: an upload worker produced no result".to_string(),
                })
            })
            .collect()
    }
}

async fn store_upload(
    store: Arc<dyn BlobStore>,
    semaphore: Option<Arc<Semaphore>>,
    source_name: &str,
    content: Bytes,
    extension: &str,
) -> Result<String> {
    let _permit = match semaphore {
        Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|_| Error::Internal {
            operation: "acquire upload slot".to_string(),
        })?),
        None => None,
    };

    let key = generate_key(extension);
    let content_type = mime_guess::from_ext(extension).first_or_octet_stream();
    let stored_url = store
        .put(&key, content, content_type.essence_str())
        .await
        .map_err(|source| Error::StoreWriteFailed {
            what: source_name.to_string(),
            source,
        })?;

    debug!(file = %source_name, key = %key, "Stored upload");
    Ok(stored_url)
}

fn rejected(source_name: String, error: &Error) -> ValidationResult {
    ValidationResult::Rejected {
        source_name,
        reason: error.kind(),
        message: error.user_message(),
    }
}
