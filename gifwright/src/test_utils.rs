//! Fixtures and fakes shared by unit and HTTP tests.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use dashmap::DashMap;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use url::Url;

use crate::archive::Archive;
use crate::config::{Config, StorageConfig};
use crate::fetch::{FetchError, ImageFetcher};
use crate::storage::memory::InMemoryBlobStore;
use crate::storage::{self, BlobStore, StorageError};

pub const TEST_BASE_URL: &str = "http://localhost:8080/blobs";

fn encode_image(image: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encode fixture image");
    bytes
}

pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_image(RgbImage::from_pixel(width, height, Rgb(color)), ImageFormat::Png)
}

pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_image(RgbImage::from_pixel(width, height, Rgb(color)), ImageFormat::Jpeg)
}

pub fn solid_gif(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_image(RgbImage::from_pixel(width, height, Rgb(color)), ImageFormat::Gif)
}

/// Smooth two-axis gradient with far more than 256 colours
pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) * 127 / (width + height).max(1)) as u8,
        ])
    });
    encode_image(image, ImageFormat::Png)
}

pub fn memory_store() -> Arc<InMemoryBlobStore> {
    Arc::new(InMemoryBlobStore::new(Url::parse(TEST_BASE_URL).expect("valid base url")))
}

/// In-memory store that counts calls and fails writes of one specific payload
pub struct FlakyBlobStore {
    inner: InMemoryBlobStore,
    failing_payload: Option<Bytes>,
    calls: AtomicUsize,
}

impl Default for FlakyBlobStore {
    fn default() -> Self {
        Self {
            inner: InMemoryBlobStore::new(Url::parse(TEST_BASE_URL).expect("valid base url")),
            failing_payload: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FlakyBlobStore {
    pub fn failing_on(payload: Bytes) -> Self {
        Self {
            failing_payload: Some(payload),
            ..Default::default()
        }
    }

    pub fn inner(&self) -> &InMemoryBlobStore {
        &self.inner
    }

    /// Total calls to get, put, delete and exists
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, key: &str, content: Bytes, content_type: &str) -> storage::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_payload.as_ref() == Some(&content) {
            return Err(StorageError::Other(anyhow::anyhow!("injected write failure")));
        }
        self.inner.put(key, content, content_type).await
    }

    async fn get(&self, key: &str) -> storage::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> storage::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> storage::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(key).await
    }

    fn public_base_url(&self) -> &Url {
        self.inner.public_base_url()
    }
}

/// Fetcher serving canned bodies, each after an optional delay; unknown URLs get a 404
#[derive(Default)]
pub struct StaticFetcher {
    responses: DashMap<String, (Bytes, Duration)>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, body: impl Into<Bytes>) {
        self.insert_delayed(url, body, Duration::ZERO);
    }

    pub fn insert_delayed(&self, url: &str, body: impl Into<Bytes>, delay: Duration) {
        self.responses.insert(url.to_string(), (body.into(), delay));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some((body, delay)) = self.responses.get(url).map(|entry| entry.value().clone()) else {
            return Err(FetchError::Status(reqwest::StatusCode::NOT_FOUND));
        };
        tokio::time::sleep(delay).await;
        Ok(body)
    }
}

/// Archive whose every write fails
pub struct FailingArchive;

#[async_trait]
impl Archive for FailingArchive {
    async fn archive(&self, _key: &str, _content: Bytes, _content_type: &str) -> Result<String, StorageError> {
        Err(StorageError::Other(anyhow::anyhow!("archive bucket unavailable")))
    }
}

/// A GIF decoded back into palette indices, for assertions
pub struct DecodedGif {
    pub width: u16,
    pub height: u16,
    pub repeat: gif::Repeat,
    pub frames: Vec<DecodedFrame>,
}

pub struct DecodedFrame {
    pub width: u16,
    pub delay: u16,
    pub transparent: Option<u8>,
    pub palette: Vec<u8>,
    pub indices: Vec<u8>,
}

impl DecodedFrame {
    pub fn color_at(&self, x: u16, y: u16) -> Option<[u8; 3]> {
        let index = *self.indices.get(y as usize * self.width as usize + x as usize)?;
        if Some(index) == self.transparent {
            return None;
        }
        let offset = index as usize * 3;
        Some([self.palette[offset], self.palette[offset + 1], self.palette[offset + 2]])
    }
}

pub fn decode_gif(bytes: &[u8]) -> DecodedGif {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options.read_info(bytes).expect("valid GIF header");

    let global_palette = decoder.global_palette().map(<[u8]>::to_vec);
    let mut frames = Vec::new();
    while let Some(frame) = decoder.read_next_frame().expect("valid GIF frame") {
        frames.push(DecodedFrame {
            width: frame.width,
            delay: frame.delay,
            transparent: frame.transparent,
            palette: frame.palette.clone().or_else(|| global_palette.clone()).expect("frame palette"),
            indices: frame.buffer.to_vec(),
        });
    }

    DecodedGif {
        width: decoder.width(),
        height: decoder.height(),
        repeat: decoder.repeat(),
        frames,
    }
}

/// Config for HTTP tests: in-memory storage, no archive, no metrics
pub fn create_test_config() -> Config {
    Config {
        storage: StorageConfig::Memory {
            public_base_url: TEST_BASE_URL.to_string(),
        },
        ..Default::default()
    }
}

/// Handles a test keeps onto the backends behind a [`TestServer`]
pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<FlakyBlobStore>,
    pub fetcher: Arc<StaticFetcher>,
}

pub fn create_test_app(config: Config, archive: Option<Arc<dyn Archive>>) -> TestApp {
    create_test_app_with_store(config, Arc::new(FlakyBlobStore::default()), archive)
}

pub fn create_test_app_with_store(config: Config, store: Arc<FlakyBlobStore>, archive: Option<Arc<dyn Archive>>) -> TestApp {
    let fetcher = Arc::new(StaticFetcher::new());
    let server = crate::Application::from_parts(config, store.clone(), archive, fetcher.clone())
        .expect("Failed to create application")
        .into_test_server();

    TestApp { server, store, fetcher }
}
