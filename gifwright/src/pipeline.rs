//! Animation assembly: fetch an ordered list of image URLs, turn each into a palette frame, encode
//! the frames as one GIF, store it, and optionally archive a copy.
//!
//! Fetching, decoding and quantizing run concurrently with one task per URL. The CPU-bound part of
//! each task runs on the blocking pool. Finished frames land in a slot keyed by their input
//! position, so the encoder always sees them in input order whatever order they complete in. The
//! first failing frame aborts the rest.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::archive::Archive;
use crate::config::AnimationConfig;
use crate::errors::{Error, Result};
use crate::fetch::{FetchError, ImageFetcher};
use crate::imaging::{self, AnimationFrame, DecodeLimits, EncodeOptions, QuantizeOptions};
use crate::metrics;
use crate::storage::{BlobStore, generate_key};

pub const GIF_CONTENT_TYPE: &str = "image/gif";

/// Per-request knobs on top of [`AnimationConfig`]
#[derive(Debug, Clone, Default)]
pub struct AnimateOptions {
    /// Write a copy to the archive store; `None` follows `archive_by_default`
    pub archive: Option<bool>,
    /// Per-frame display time in hundredths of a second; one entry per URL
    pub frame_delays: Option<Vec<u16>>,
}

#[derive(Debug, Clone)]
pub struct AnimationResult {
    /// Blob store key of the animation, `<uuid>.gif`
    pub key: String,
    pub encoded_bytes: Bytes,
    pub stored_url: String,
    /// Service-relative path that serves the animation as an attachment
    pub download_path: String,
    pub frame_count: usize,
    /// Whether a copy reached the archive
    pub archived: bool,
}

pub fn download_path(key: &str) -> String {
    format!("/download/{key}")
}

/// What to do with the archive step for one request
enum ArchiveStep<'a> {
    Skip,
    /// The caller asked for archival but no archive store is configured
    Unavailable,
    Write(&'a Arc<dyn Archive>),
}

/// Resolves frame URLs to bytes: URLs under the store's base URL are read from the store, anything
/// else goes through the fetcher.
#[derive(Clone)]
struct FrameSource {
    store: Arc<dyn BlobStore>,
    fetcher: Arc<dyn ImageFetcher>,
}

impl FrameSource {
    async fn load(&self, index: usize, url: &str) -> Result<Bytes> {
        if let Some(key) = self.store.key_for_url(url) {
            return self.store.get(&key).await.map_err(|source| Error::StoreReadFailed {
                what: format!("image {index} ({url})"),
                source,
            });
        }

        self.fetcher.fetch(url).await.map_err(|e| match e {
            FetchError::RemoteDisabled => Error::BadRequest {
                message: format!("Image {index} ({url}) is not served by this service and remote fetching is disabled"),
            },
            other => Error::FetchFailed {
                index,
                url: url.to_string(),
                message: other.to_string(),
            },
        })
    }
}

pub struct AnimationPipeline {
    source: FrameSource,
    archive: Option<Arc<dyn Archive>>,
    config: AnimationConfig,
}

impl AnimationPipeline {
    pub fn new(store: Arc<dyn BlobStore>, fetcher: Arc<dyn ImageFetcher>, archive: Option<Arc<dyn Archive>>, config: AnimationConfig) -> Self {
        Self {
            source: FrameSource { store, fetcher },
            archive,
            config,
        }
    }

    fn archive_step(&self, requested: Option<bool>) -> ArchiveStep<'_> {
        match (requested, &self.archive) {
            (Some(false), _) => ArchiveStep::Skip,
            (None, _) if !self.config.archive_by_default => ArchiveStep::Skip,
            (None, None) => ArchiveStep::Skip,
            (Some(true), None) => ArchiveStep::Unavailable,
            (_, Some(archive)) => ArchiveStep::Write(archive),
        }
    }

    /// Build, store and optionally archive one animation from `urls`, in order.
    ///
    /// An empty list fails before any fetch or store call. When the archive write fails the
    /// animation has already been stored and counted as created; the error carries its URLs.
    #[instrument(skip_all, fields(frames = urls.len(), archive = ?options.archive))]
    pub async fn animate(&self, urls: &[String], options: AnimateOptions) -> Result<AnimationResult> {
        let result = self.run(urls, options).await;
        if let Err(e) = &result
            && !matches!(e, Error::ArchiveFailed { .. })
        {
            metrics::record_animation_failure(e.kind());
        }
        result
    }

    async fn run(&self, urls: &[String], options: AnimateOptions) -> Result<AnimationResult> {
        if urls.is_empty() {
            return Err(Error::EmptyInput {
                what: "image URLs".to_string(),
            });
        }
        if urls.len() > self.config.max_frames {
            return Err(Error::BadRequest {
                message: format!("{} images requested; at most {} frames are allowed", urls.len(), self.config.max_frames),
            });
        }
        if let Some(delays) = &options.frame_delays
            && delays.len() != urls.len()
        {
            return Err(Error::BadRequest {
                message: format!("{} frame delays given for {} images", delays.len(), urls.len()),
            });
        }

        let frames = self.render_frames(urls).await?;
        let frames: Vec<AnimationFrame> = frames
            .into_iter()
            .enumerate()
            .map(|(i, frame)| {
                let delay = options
                    .frame_delays
                    .as_ref()
                    .map_or(self.config.default_frame_delay_cs, |delays| delays[i]);
                frame.with_delay(delay)
            })
            .collect();
        let frame_count = frames.len();

        let encode_options = EncodeOptions {
            loop_count: self.config.loop_count,
        };
        let encoded = tokio::task::spawn_blocking(move || imaging::encode(&frames, &encode_options))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("join encoder task: {e}"),
            })??;
        let encoded_bytes = Bytes::from(encoded);

        let key = generate_key("gif");
        let stored_url = self
            .source
            .store
            .put(&key, encoded_bytes.clone(), GIF_CONTENT_TYPE)
            .await
            .map_err(|source| Error::StoreWriteFailed {
                what: "animation".to_string(),
                source,
            })?;
        let download_path = download_path(&key);
        metrics::record_animation(frame_count);
        info!(key = %key, frames = frame_count, bytes = encoded_bytes.len(), "Animation stored");

        let archived = match self.archive_step(options.archive) {
            ArchiveStep::Skip => false,
            ArchiveStep::Unavailable => {
                warn!(key = %key, "Archival requested but no archive is configured; skipping");
                false
            }
            ArchiveStep::Write(archive) => {
                if let Err(e) = archive.archive(&key, encoded_bytes.clone(), GIF_CONTENT_TYPE).await {
                    metrics::record_archive_failure();
                    return Err(Error::ArchiveFailed {
                        animation_url: stored_url,
                        download_url: download_path,
                        message: e.to_string(),
                    });
                }
                true
            }
        };

        Ok(AnimationResult {
            key,
            encoded_bytes,
            stored_url,
            download_path,
            frame_count,
            archived,
        })
    }

    /// Fetch, decode and quantize every URL concurrently; frames come back in input order
    async fn render_frames(&self, urls: &[String]) -> Result<Vec<AnimationFrame>> {
        let semaphore = (self.config.fetch_concurrency > 0).then(|| Arc::new(Semaphore::new(self.config.fetch_concurrency)));
        let limits = DecodeLimits {
            max_dimension: self.config.max_image_dimension,
        };
        let quantize_options = QuantizeOptions {
            max_colors: self.config.max_colors,
            dither: self.config.dither,
        };

        let mut workers = JoinSet::new();
        for (index, url) in urls.iter().cloned().enumerate() {
            let source = self.source.clone();
            let semaphore = semaphore.clone();
            workers.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|_| Error::Internal {
                        operation: "acquire fetch slot".to_string(),
                    })?),
                    None => None,
                };

                let bytes = source.load(index, &url).await?;
                debug!(index, url = %url, bytes = bytes.len(), "Loaded frame source");

                let frame = tokio::task::spawn_blocking(move || {
                    let asset = imaging::decode(&bytes, &limits)?;
                    imaging::quantize(&asset, &quantize_options)
                })
                .await
                .map_err(|e| Error::Internal {
                    operation: format!("join frame task: {e}"),
                })?
                .map_err(|e| Error::from_imaging(e, index, &url))?;

                Ok::<_, Error>((index, frame))
            });
        }

        let mut slots: Vec<Option<AnimationFrame>> = vec![None; urls.len()];
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(|e| Error::Internal {
                operation: format!("join frame worker: {e}"),
            });
            match outcome.and_then(|result| result) {
                Ok((index, frame)) => slots[index] = Some(frame),
                Err(e) => {
                    workers.abort_all();
                    return Err(e);
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| Error::Internal {
                    operation: format!("render frame {index}: worker produced no frame"),
                })
            })
            .collect()
    }
}
