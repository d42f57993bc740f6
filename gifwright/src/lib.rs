//! # gifwright: image ingestion and animated GIF assembly
//!
//! `gifwright` is an HTTP service with two jobs. It accepts batches of uploaded images and stores
//! each one durably under a fresh public URL. It also takes an ordered list of image URLs and
//! assembles them into a single animated GIF, which it stores, optionally archives, and offers
//! for download.
//!
//! ## Request Flow
//!
//! ### Upload (`POST /upload`)
//!
//! The multipart body is collected into [`ingest::UploadTask`]s and handed to the
//! [`ingest::IngestCoordinator`]. File names are checked against the extension allow-list before
//! anything is written. Valid files are then written to the [`storage::BlobStore`] concurrently,
//! and the resulting URLs are returned in upload order. Under the default fail-fast policy a single
//! bad file rejects the whole batch.
//!
//! ### Animate (`POST /animate`)
//!
//! The [`pipeline::AnimationPipeline`] resolves every URL concurrently. URLs the blob store issued
//! are read straight from the store, and anything else goes through [`fetch::ImageFetcher`]. Each
//! image is decoded and reduced to a per-frame palette ([`imaging`]) on the blocking pool. The
//! frames are then encoded in their original order into one GIF, which is stored under
//! `<uuid>.gif` and copied to the archive store when requested.
//!
//! ### Download (`GET /download/{id}`)
//!
//! Streams a stored animation back as an attachment.
//!
//! ## Configuration
//!
//! See [`config`]: a YAML file plus `GIFWRIGHT_`-prefixed environment overrides.
//!
//! ## Observability
//!
//! `tracing` spans on every request and pipeline stage, optional OTLP export ([`telemetry`]), and
//! optional Prometheus metrics at `/internal/metrics` ([`metrics`]).

pub mod api;
pub mod archive;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod imaging;
pub mod ingest;
pub mod limits;
pub mod metrics;
pub mod openapi;
pub mod pipeline;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test;
#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tower_http::{
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api::handlers::{animations, blobs, images};
use crate::archive::Archive;
use crate::fetch::ImageFetcher;
use crate::ingest::IngestCoordinator;
use crate::limits::Limiters;
use crate::openapi::ApiDoc;
use crate::pipeline::AnimationPipeline;
use crate::storage::BlobStore;

pub use config::Config;

/// Shared state handed to every request handler.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .store(store.clone())
///     .ingest(Arc::new(IngestCoordinator::new(store.clone(), ingest_config)))
///     .pipeline(Arc::new(pipeline))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    /// Primary blob store; uploads, animations and `/blobs` all go through it
    pub store: Arc<dyn BlobStore>,
    pub ingest: Arc<IngestCoordinator>,
    pub pipeline: Arc<AnimationPipeline>,
    #[builder(default)]
    pub limiters: Limiters,
}

/// Build the HTTP router for the given state
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    // Uploads get their own body limit; JSON endpoints keep axum's default
    let upload_route = Router::new().route(
        "/upload",
        post(images::upload_images).layer(DefaultBodyLimit::max(state.config.limits.max_upload_bytes)),
    );

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(upload_route)
        .route("/animate", post(animations::create_animation))
        .route("/download/{id}", get(animations::download_animation))
        .route("/blobs/{key}", get(blobs::get_blob))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    if let Some(static_dir) = &state.config.static_dir {
        if !static_dir.is_dir() {
            anyhow::bail!("static_dir {} is not a directory", static_dir.display());
        }
        info!("Serving static assets from {}", static_dir.display());
        router = router.nest_service("/static", ServeDir::new(static_dir));
    }

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The assembled service: stores, workers and router, ready to serve
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create the stores and fetcher described by `config` and build the router
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting gifwright with configuration: {:#?}", config);

        let store = storage::create_blob_store(&config.storage).await?;
        let archive = archive::create_archive(config.archive.as_ref()).await?;
        let fetcher = fetch::create_fetcher(&config.fetch)?;

        Self::from_parts(config, store, archive, fetcher)
    }

    /// Build the application around caller-supplied backends
    pub fn from_parts(
        config: Config,
        store: Arc<dyn BlobStore>,
        archive: Option<Arc<dyn Archive>>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> anyhow::Result<Self> {
        if archive.is_none() && config.animation.archive_by_default {
            debug!("No archive store configured; archival requests will be skipped");
        }

        let ingest = Arc::new(IngestCoordinator::new(store.clone(), config.ingest.clone()));
        let pipeline = Arc::new(AnimationPipeline::new(store.clone(), fetcher, archive, config.animation.clone()));

        let state = AppState::builder()
            .config(config.clone())
            .store(store)
            .ingest(ingest)
            .pipeline(pipeline)
            .limiters(Limiters::new(&config.limits))
            .build();

        let router = build_router(&state)?;
        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("gifwright listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
