//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `GIFWRIGHT_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `GIFWRIGHT_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `GIFWRIGHT_STORAGE__TYPE=memory` sets the `storage.type` field and
//! `GIFWRIGHT_ANIMATION__DEFAULT_FRAME_DELAY_CS=50` halves the default frame delay.
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`
//! - **Storage**: `storage.type` (`local`, `s3`, `memory`) and `storage.public_base_url`
//! - **Archive**: optional second storage block; archival is unavailable when it is absent
//! - **Ingest**: `ingest.policy` (`fail_fast` or `collect_all`), worker concurrency, extension allow-list
//! - **Animation**: frame timing, palette size, dithering, looping, frame and dimension caps
//! - **Fetch**: timeout and size cap for images fetched from URLs the store does not own
//! - **Limits**: request body limit and per-endpoint admission control
//! - **Features**: `enable_metrics`, `enable_otel_export`, `static_dir`

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "GIFWRIGHT_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty (or missing) YAML file yields a runnable service backed by
/// a local directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Primary blob store for uploads and produced animations
    pub storage: StorageConfig,
    /// Secondary store that receives a copy of every animation when archival is requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<StorageConfig>,
    pub ingest: IngestConfig,
    pub animation: AnimationConfig,
    pub fetch: FetchConfig,
    pub limits: LimitsConfig,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Directory of static frontend assets served under `/static`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
}

fn default_public_base_url() -> String {
    "http://localhost:8080/blobs".to_string()
}

/// Blob storage backend configuration.
///
/// `public_base_url` is the prefix under which stored keys are reachable. For the local and memory
/// backends the service itself serves blobs at `/blobs/{key}`, so the default points there.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Store blobs in a directory on the local filesystem
    Local {
        path: PathBuf,
        #[serde(default = "default_public_base_url")]
        public_base_url: String,
    },
    /// Store blobs in an S3-compatible bucket
    S3 {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
        /// Custom endpoint for S3-compatible services (MinIO, R2, ...)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        /// Key prefix inside the bucket
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        #[serde(default = "default_public_base_url")]
        public_base_url: String,
    },
    /// Keep blobs in process memory (lost on restart)
    Memory {
        #[serde(default = "default_public_base_url")]
        public_base_url: String,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            path: PathBuf::from("./data/blobs"),
            public_base_url: default_public_base_url(),
        }
    }
}

impl StorageConfig {
    pub fn public_base_url(&self) -> &str {
        match self {
            StorageConfig::Local { public_base_url, .. }
            | StorageConfig::S3 { public_base_url, .. }
            | StorageConfig::Memory { public_base_url } => public_base_url,
        }
    }
}

/// How an upload batch reacts to a failing item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPolicy {
    /// The first failure aborts the batch; no URLs are returned
    #[default]
    FailFast,
    /// Every item is attempted; accepted and rejected items are both reported
    CollectAll,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub policy: IngestPolicy,
    /// Maximum number of concurrent store writes per batch (0 = one worker per file)
    pub max_concurrency: usize,
    /// Accepted file extensions, compared case-insensitively
    pub allowed_extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            policy: IngestPolicy::FailFast,
            max_concurrency: 0,
            allowed_extensions: ["jpg", "jpeg", "png", "gif"].into_iter().map(String::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnimationConfig {
    /// Display time of each frame when the caller does not supply per-frame timing (1/100 s)
    pub default_frame_delay_cs: u16,
    /// Palette size per frame (2..=256)
    pub max_colors: usize,
    /// Apply Floyd-Steinberg error diffusion while mapping pixels to the palette
    pub dither: bool,
    /// Number of times the animation repeats; `None` loops forever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_count: Option<u16>,
    /// Maximum number of frames per animation
    pub max_frames: usize,
    /// Maximum number of concurrent fetches per request (0 = one worker per frame)
    pub fetch_concurrency: usize,
    /// Maximum width and height of a source image, in pixels
    pub max_image_dimension: u32,
    /// Whether animations are archived when the request does not say
    pub archive_by_default: bool,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            default_frame_delay_cs: 100,
            max_colors: 256,
            dither: true,
            loop_count: None,
            max_frames: 200,
            fetch_concurrency: 8,
            max_image_dimension: 4096,
            archive_by_default: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Timeout for fetching an image from a remote URL
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum accepted size of a fetched image, in bytes
    pub max_bytes: usize,
    /// Allow fetching images from URLs that are not served by the configured store
    pub allow_remote: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 32 * 1024 * 1024,
            allow_remote: true,
        }
    }
}

/// Resource limits for protecting system capacity
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum request body size accepted by `/upload`
    pub max_upload_bytes: usize,
    pub uploads: RequestLimitConfig,
    pub animations: RequestLimitConfig,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 64 * 1024 * 1024,
            uploads: RequestLimitConfig::default(),
            animations: RequestLimitConfig {
                max_concurrent: 8,
                ..RequestLimitConfig::default()
            },
        }
    }
}

/// Admission control for one endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestLimitConfig {
    /// Maximum concurrent requests (0 = unlimited)
    pub max_concurrent: usize,
    /// Maximum requests waiting for a slot (0 = unlimited)
    pub max_waiting: usize,
    /// Maximum time to wait for a slot, in seconds (0 = reject immediately when full)
    pub max_wait_secs: u64,
}

impl Default for RequestLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 32,
            max_waiting: 128,
            max_wait_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            storage: StorageConfig::default(),
            archive: None,
            ingest: IngestConfig::default(),
            animation: AnimationConfig::default(),
            fetch: FetchConfig::default(),
            limits: LimitsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
            static_dir: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // GIFWRIGHT_CONFIG names the file itself and is consumed by clap
            .merge(Env::prefixed("GIFWRIGHT_").ignore(&["config"]).split("__"))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: String| Error::Internal {
            operation: format!("Config validation: {message}"),
        };

        if !(2..=256).contains(&self.animation.max_colors) {
            return Err(invalid(format!(
                "animation.max_colors must be between 2 and 256 (got {})",
                self.animation.max_colors
            )));
        }

        if self.animation.max_frames == 0 {
            return Err(invalid("animation.max_frames must be greater than 0".to_string()));
        }

        if self.animation.max_image_dimension == 0 || self.animation.max_image_dimension > u16::MAX as u32 {
            return Err(invalid(format!(
                "animation.max_image_dimension must be between 1 and {} (got {})",
                u16::MAX,
                self.animation.max_image_dimension
            )));
        }

        if self.ingest.allowed_extensions.is_empty() {
            return Err(invalid("ingest.allowed_extensions must not be empty".to_string()));
        }

        // Extensions end up in blob keys, which only take 1-8 ASCII letters or digits
        if let Some(bad) = self
            .ingest
            .allowed_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return Err(invalid(format!(
                "ingest.allowed_extensions entry {bad:?} must be 1-8 ASCII letters or digits"
            )));
        }

        if self.fetch.max_bytes == 0 {
            return Err(invalid("fetch.max_bytes must be greater than 0".to_string()));
        }

        let stores = std::iter::once(("storage", &self.storage)).chain(self.archive.as_ref().map(|archive| ("archive", archive)));
        for (section, store) in stores {
            if let Err(e) = Url::parse(store.public_base_url()) {
                return Err(invalid(format!(
                    "{section}.public_base_url {:?} is not a valid URL: {e}",
                    store.public_base_url()
                )));
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
