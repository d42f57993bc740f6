//! End-to-end tests through the HTTP router.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{StatusCode, header};
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use bytes::Bytes;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::Application;
use crate::api::models::{AnimateResponse, IngestResponse};
use crate::archive::{Archive, BlobArchive};
use crate::config::IngestPolicy;
use crate::fetch::HttpFetcher;
use crate::storage::BlobStore;
use crate::test_utils::{
    FailingArchive, FlakyBlobStore, TEST_BASE_URL, create_test_app, create_test_app_with_store, create_test_config, decode_gif,
    memory_store, solid_gif, solid_jpeg, solid_png,
};

const RED: [u8; 3] = [255, 0, 0];
const BLUE: [u8; 3] = [0, 0, 255];

fn image_part(name: &str, bytes: impl Into<Bytes>) -> Part {
    Part::bytes(bytes.into()).file_name(name.to_string())
}

fn images_form(files: Vec<(&str, Vec<u8>)>) -> MultipartForm {
    files
        .into_iter()
        .fold(MultipartForm::new(), |form, (name, bytes)| form.add_part("images", image_part(name, bytes)))
}

fn key_of(url: &str) -> &str {
    url.rsplit('/').next().unwrap()
}

async fn upload(server: &TestServer, files: Vec<(&str, Vec<u8>)>) -> Vec<String> {
    let response = server.post("/upload").multipart(images_form(files)).await;
    response.assert_status_ok();
    response.json::<IngestResponse>().image_urls
}

// ===== Upload =====

#[test_log::test(tokio::test)]
async fn test_upload_returns_urls_in_order() {
    let app = create_test_app(create_test_config(), None);
    let files = vec![
        ("a.png", solid_png(4, 4, RED)),
        ("b.jpg", solid_jpeg(4, 4, BLUE)),
        ("c.gif", solid_gif(4, 4, [0, 255, 0])),
    ];

    let urls = upload(&app.server, files.clone()).await;

    assert_eq!(urls.len(), 3);
    for (url, (name, bytes)) in urls.iter().zip(&files) {
        assert!(url.starts_with(TEST_BASE_URL), "{url}");
        let extension = name.rsplit('.').next().unwrap();
        assert!(url.ends_with(&format!(".{extension}")), "{url} should keep the {extension} extension");

        let blob = app.server.get(&format!("/blobs/{}", key_of(url))).await;
        blob.assert_status_ok();
        assert_eq!(blob.as_bytes().as_ref(), bytes.as_slice());
    }
}

#[tokio::test]
async fn test_upload_extension_check_is_case_insensitive() {
    let app = create_test_app(create_test_config(), None);

    let urls = upload(&app.server, vec![("PHOTO.JPG", solid_jpeg(2, 2, RED))]).await;

    assert_eq!(urls.len(), 1);
    assert!(urls[0].ends_with(".jpg"));
}

#[test_log::test(tokio::test)]
async fn test_upload_with_unsupported_file_rejects_batch() {
    let app = create_test_app(create_test_config(), None);
    let form = images_form(vec![
        ("a.png", solid_png(2, 2, RED)),
        ("b.jpg", solid_jpeg(2, 2, BLUE)),
        ("c.txt", b"not an image".to_vec()),
    ]);

    let response = app.server.post("/upload").multipart(form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["kind"], "unsupported_format");
    assert!(body["error"].as_str().unwrap().contains("c.txt"));
    assert!(body.get("imageUrls").is_none());
    assert!(app.store.inner().is_empty(), "nothing is written for a rejected batch");
}

#[tokio::test]
async fn test_upload_without_images_is_rejected() {
    let app = create_test_app(create_test_config(), None);
    let form = MultipartForm::new().add_text("note", "no files here");

    let response = app.server.post("/upload").multipart(form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["kind"], "empty_input");
    assert_eq!(app.store.calls(), 0);
}

#[tokio::test]
async fn test_upload_ignores_other_fields() {
    let app = create_test_app(create_test_config(), None);
    let form = MultipartForm::new()
        .add_text("album", "holiday")
        .add_part("images", image_part("a.png", solid_png(2, 2, RED)));

    let response = app.server.post("/upload").multipart(form).await;

    response.assert_status_ok();
    assert_eq!(response.json::<IngestResponse>().image_urls.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_upload_store_failure_fails_batch() {
    let broken = solid_png(3, 3, BLUE);
    let store = Arc::new(FlakyBlobStore::failing_on(Bytes::from(broken.clone())));
    let app = create_test_app_with_store(create_test_config(), store, None);
    let form = images_form(vec![("a.png", solid_png(3, 3, RED)), ("b.png", broken)]);

    let response = app.server.post("/upload").multipart(form).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["kind"], "store_write_failed");
    assert!(!body["error"].as_str().unwrap().contains("injected"), "backend details stay in the logs");
    assert!(body.get("imageUrls").is_none());
}

#[tokio::test]
async fn test_upload_collect_all_reports_rejections() {
    let mut config = create_test_config();
    config.ingest.policy = IngestPolicy::CollectAll;
    let app = create_test_app(config, None);
    let form = images_form(vec![
        ("a.png", solid_png(2, 2, RED)),
        ("notes.txt", b"hello".to_vec()),
        ("b.gif", solid_gif(2, 2, BLUE)),
    ]);

    let response = app.server.post("/upload").multipart(form).await;

    response.assert_status_ok();
    let body: IngestResponse = response.json();
    assert_eq!(body.image_urls.len(), 2);
    assert!(body.image_urls[0].ends_with(".png"));
    assert!(body.image_urls[1].ends_with(".gif"));
    assert_eq!(body.rejected.len(), 1);
    assert_eq!(body.rejected[0].source_name, "notes.txt");
    assert_eq!(body.rejected[0].kind.as_str(), "unsupported_format");
}

#[tokio::test]
async fn test_upload_over_body_limit() {
    let mut config = create_test_config();
    config.limits.max_upload_bytes = 1024;
    let app = create_test_app(config, None);
    let form = images_form(vec![("big.png", vec![0u8; 8 * 1024])]);

    let response = app.server.post("/upload").multipart(form).await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.json::<Value>()["kind"], "payload_too_large");
    assert!(app.store.inner().is_empty());
}

// ===== Animate and download =====

#[test_log::test(tokio::test)]
async fn test_animate_then_download() {
    let app = create_test_app(create_test_config(), None);
    let urls = upload(&app.server, vec![("red.png", solid_png(4, 4, RED)), ("blue.png", solid_png(4, 4, BLUE))]).await;

    let response = app.server.post("/animate").json(&json!({ "imageUrls": urls })).await;

    response.assert_status_ok();
    let animation: AnimateResponse = response.json();
    assert_eq!(animation.frame_count, 2);
    assert!(!animation.archived, "no archive is configured");
    assert!(animation.animation_url.starts_with(TEST_BASE_URL));
    assert!(animation.animation_url.ends_with(".gif"));
    let key = key_of(&animation.animation_url);
    assert_eq!(animation.download_url, format!("/download/{key}"));

    let download = app.server.get(&animation.download_url).await;
    download.assert_status_ok();
    assert_eq!(download.header(header::CONTENT_TYPE), "image/gif");
    assert_eq!(
        download.header(header::CONTENT_DISPOSITION),
        format!("attachment; filename=\"{key}\"").as_str()
    );

    let gif = decode_gif(download.as_bytes());
    assert_eq!((gif.width, gif.height), (4, 4));
    assert_eq!(gif.repeat, gif::Repeat::Infinite);
    assert_eq!(gif.frames.len(), 2);
    assert_eq!(gif.frames[0].color_at(1, 1), Some(RED));
    assert_eq!(gif.frames[1].color_at(1, 1), Some(BLUE));
    assert!(gif.frames.iter().all(|frame| frame.delay == 100));
}

#[tokio::test]
async fn test_animate_with_frame_delays() {
    let app = create_test_app(create_test_config(), None);
    let urls = upload(&app.server, vec![("a.png", solid_png(2, 2, RED)), ("b.png", solid_png(2, 2, BLUE))]).await;

    let response = app
        .server
        .post("/animate")
        .json(&json!({ "imageUrls": urls, "frameDelays": [10, 250] }))
        .await;

    response.assert_status_ok();
    let animation: AnimateResponse = response.json();
    let gif = decode_gif(app.server.get(&animation.download_url).await.as_bytes());
    let delays: Vec<u16> = gif.frames.iter().map(|frame| frame.delay).collect();
    assert_eq!(delays, vec![10, 250]);
}

#[tokio::test]
async fn test_animate_with_mismatched_delays_is_rejected() {
    let app = create_test_app(create_test_config(), None);
    let urls = upload(&app.server, vec![("a.png", solid_png(2, 2, RED))]).await;
    let calls_before = app.store.calls();

    let response = app
        .server
        .post("/animate")
        .json(&json!({ "imageUrls": urls, "frameDelays": [10, 20] }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["kind"], "invalid_request");
    assert_eq!(app.store.calls(), calls_before);
}

#[tokio::test]
async fn test_animate_empty_list_touches_nothing() {
    let app = create_test_app(create_test_config(), None);

    for body in [json!({ "imageUrls": [] }), json!({})] {
        let response = app.server.post("/animate").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["kind"], "empty_input");
    }

    assert_eq!(app.store.calls(), 0);
    assert_eq!(app.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_animate_malformed_json() {
    let app = create_test_app(create_test_config(), None);

    let response = app
        .server
        .post("/animate")
        .content_type("application/json")
        .bytes(Bytes::from_static(b"{\"imageUrls\": ["))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["kind"], "invalid_request");
}

#[tokio::test]
async fn test_animate_unknown_stored_image() {
    let app = create_test_app(create_test_config(), None);
    let missing = format!("{TEST_BASE_URL}/00000000-0000-0000-0000-000000000000.png");

    let response = app.server.post("/animate").json(&json!({ "imageUrls": [missing] })).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>()["kind"], "store_read_failed");
    assert_eq!(app.fetcher.calls(), 0, "store URLs never go through the fetcher");
}

#[tokio::test]
async fn test_animate_undecodable_image() {
    let app = create_test_app(create_test_config(), None);
    let urls = upload(
        &app.server,
        vec![("good.png", solid_png(2, 2, RED)), ("bad.png", b"definitely not a png".to_vec())],
    )
    .await;

    let response = app.server.post("/animate").json(&json!({ "imageUrls": urls })).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["kind"], "decode_failed");
    assert!(body["error"].as_str().unwrap().contains("image 1"), "{body}");
}

#[tokio::test]
async fn test_animate_mismatched_sizes() {
    let app = create_test_app(create_test_config(), None);
    let urls = upload(&app.server, vec![("a.png", solid_png(4, 4, RED)), ("b.png", solid_png(8, 2, BLUE))]).await;
    let stored_before = app.store.inner().len();

    let response = app.server.post("/animate").json(&json!({ "imageUrls": urls })).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>()["kind"], "encode_failed");
    assert_eq!(app.store.inner().len(), stored_before, "no animation is stored");
}

#[tokio::test]
async fn test_animate_remote_images_through_fetcher() {
    let app = create_test_app(create_test_config(), None);
    app.fetcher.insert("https://images.example.com/one.png", solid_png(3, 3, RED));
    let stored = upload(&app.server, vec![("two.png", solid_png(3, 3, BLUE))]).await;

    let response = app
        .server
        .post("/animate")
        .json(&json!({ "imageUrls": ["https://images.example.com/one.png", stored[0]] }))
        .await;

    response.assert_status_ok();
    assert_eq!(app.fetcher.calls(), 1);
    let animation: AnimateResponse = response.json();
    let gif = decode_gif(app.server.get(&animation.download_url).await.as_bytes());
    assert_eq!(gif.frames[0].color_at(0, 0), Some(RED));
    assert_eq!(gif.frames[1].color_at(0, 0), Some(BLUE));
}

#[tokio::test]
async fn test_animate_remote_fetch_failure() {
    let app = create_test_app(create_test_config(), None);

    let response = app
        .server
        .post("/animate")
        .json(&json!({ "imageUrls": ["https://images.example.com/missing.png"] }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["kind"], "fetch_failed");
}

#[tokio::test]
async fn test_animate_remote_disabled() {
    let mut config = create_test_config();
    config.fetch.allow_remote = false;
    let store = Arc::new(FlakyBlobStore::default());
    let fetcher = crate::fetch::create_fetcher(&config.fetch).unwrap();
    let server = Application::from_parts(config, store, None, fetcher).unwrap().into_test_server();

    let response = server
        .post("/animate")
        .json(&json!({ "imageUrls": ["https://images.example.com/one.png"] }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["kind"], "invalid_request");
}

#[test_log::test(tokio::test)]
async fn test_animate_fetches_over_http() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/frames/red.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(solid_png(2, 2, RED)))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/frames/blue.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(solid_jpeg(2, 2, BLUE)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config();
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch).unwrap());
    let server = Application::from_parts(config, Arc::new(FlakyBlobStore::default()), None, fetcher)
        .unwrap()
        .into_test_server();

    let urls = [
        format!("{}/frames/red.png", mock_server.uri()),
        format!("{}/frames/blue.jpg", mock_server.uri()),
    ];
    let response = server.post("/animate").json(&json!({ "imageUrls": urls })).await;

    response.assert_status_ok();
    assert_eq!(response.json::<AnimateResponse>().frame_count, 2);
}

#[test_log::test(tokio::test)]
async fn test_animate_archives_copy() {
    let archive_store = memory_store();
    let archive: Arc<dyn Archive> = Arc::new(BlobArchive::new(archive_store.clone()));
    let app = create_test_app(create_test_config(), Some(archive));
    let urls = upload(&app.server, vec![("a.png", solid_png(2, 2, RED))]).await;

    let response = app.server.post("/animate").json(&json!({ "imageUrls": urls })).await;

    response.assert_status_ok();
    let animation: AnimateResponse = response.json();
    assert!(animation.archived);
    let key = key_of(&animation.animation_url);
    let primary = app.store.inner().get(key).await.unwrap();
    let archived = archive_store.get(key).await.unwrap();
    assert_eq!(primary, archived);
}

#[tokio::test]
async fn test_animate_archive_opt_out() {
    let archive: Arc<dyn Archive> = Arc::new(FailingArchive);
    let app = create_test_app(create_test_config(), Some(archive));
    let urls = upload(&app.server, vec![("a.png", solid_png(2, 2, RED))]).await;

    let response = app
        .server
        .post("/animate")
        .json(&json!({ "imageUrls": urls, "archive": false }))
        .await;

    response.assert_status_ok();
    assert!(!response.json::<AnimateResponse>().archived);
}

#[test_log::test(tokio::test)]
async fn test_animate_archive_failure_keeps_animation() {
    let archive: Arc<dyn Archive> = Arc::new(FailingArchive);
    let app = create_test_app(create_test_config(), Some(archive));
    let urls = upload(&app.server, vec![("a.png", solid_png(2, 2, RED)), ("b.png", solid_png(2, 2, BLUE))]).await;

    let response = app.server.post("/animate").json(&json!({ "imageUrls": urls })).await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["kind"], "archive_failed");
    let animation_url = body["animationUrl"].as_str().unwrap();
    let download_url = body["downloadUrl"].as_str().unwrap();
    assert!(animation_url.ends_with(".gif"));

    let download = app.server.get(download_url).await;
    download.assert_status_ok();
    assert_eq!(decode_gif(download.as_bytes()).frames.len(), 2);
}

#[tokio::test]
async fn test_animate_busy_is_rejected() {
    let mut config = create_test_config();
    config.limits.animations.max_concurrent = 1;
    config.limits.animations.max_wait_secs = 0;
    let app = create_test_app(config, None);
    let slow = "https://images.example.com/slow.png";
    app.fetcher.insert_delayed(slow, solid_png(2, 2, RED), Duration::from_millis(300));

    let first = app.server.post("/animate").json(&json!({ "imageUrls": [slow] })).into_future();
    let second = app.server.post("/animate").json(&json!({ "imageUrls": [slow] })).into_future();
    let (first, second) = tokio::join!(first, second);

    first.assert_status_ok();
    second.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.json::<Value>()["kind"], "too_many_requests");
}

#[tokio::test]
async fn test_download_unknown_or_invalid_ids() {
    let app = create_test_app(create_test_config(), None);
    let png = upload(&app.server, vec![("a.png", solid_png(2, 2, RED))]).await;

    for id in [
        "00000000-0000-0000-0000-000000000000.gif".to_string(),
        "not-a-key.gif".to_string(),
        key_of(&png[0]).to_string(),
    ] {
        let response = app.server.get(&format!("/download/{id}")).await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["kind"], "not_found", "{id}");
    }
}

#[tokio::test]
async fn test_blob_not_found() {
    let app = create_test_app(create_test_config(), None);

    let response = app.server.get("/blobs/00000000-0000-0000-0000-000000000000.png").await;

    response.assert_status(StatusCode::NOT_FOUND);
}

// ===== Service routes =====

#[tokio::test]
async fn test_healthz() {
    let app = create_test_app(create_test_config(), None);

    let response = app.server.get("/healthz").await;

    response.assert_status_ok();
    response.assert_text("OK");
}

#[tokio::test]
async fn test_openapi_document_served() {
    let app = create_test_app(create_test_config(), None);

    let response = app.server.get("/api-docs/openapi.json").await;

    response.assert_status_ok();
    let doc: Value = response.json();
    assert!(doc["paths"]["/upload"]["post"].is_object());
    assert!(doc["paths"]["/animate"]["post"].is_object());
}

#[tokio::test]
async fn test_metrics_endpoint_only_when_enabled() {
    let app = create_test_app(create_test_config(), None);
    app.server.get("/internal/metrics").await.assert_status(StatusCode::NOT_FOUND);
}

// The Prometheus recorder is process-wide, so this is the only test that enables it
#[test_log::test(tokio::test)]
async fn test_metrics_enabled_exports_domain_counters() {
    let mut config = create_test_config();
    config.enable_metrics = true;
    let archive: Arc<dyn Archive> = Arc::new(FailingArchive);
    let app = create_test_app(config, Some(archive));
    let urls = upload(&app.server, vec![("a.png", solid_png(2, 2, RED))]).await;

    // Stored but not archived: a created animation plus an archive failure
    let response = app.server.post("/animate").json(&json!({ "imageUrls": urls })).await;
    response.assert_status(StatusCode::BAD_GATEWAY);

    let response = app.server.get("/internal/metrics").await;
    response.assert_status_ok();
    let text = response.text();
    assert!(text.contains("gifwright_images_ingested_total"), "{text}");
    assert!(text.contains("gifwright_animations_created_total"), "{text}");
    assert!(text.contains("gifwright_animation_frames"), "{text}");
    assert!(text.contains("gifwright_archive_failures_total"), "{text}");
    assert!(!text.contains(r#"kind="archive_failed""#), "{text}");
}
