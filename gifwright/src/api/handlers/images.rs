use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::MultipartError,
    },
    http::StatusCode,
};
use tracing::{debug, instrument};

use crate::{
    AppState,
    api::models::IngestResponse,
    errors::{Error, ErrorBody, Result},
    ingest::UploadTask,
    limits,
};

/// Multipart field that carries the images; other fields are ignored
pub const IMAGES_FIELD: &str = "images";

#[utoipa::path(
    post,
    path = "/upload",
    tag = "images",
    summary = "Upload images",
    description = "Store a batch of images. Every file is sent as a separate `images` part; only jpg, jpeg, png and gif \
                   file names are accepted (case-insensitive). URLs come back in upload order.",
    request_body(
        content_type = "multipart/form-data",
        description = "One or more files under the `images` field"
    ),
    responses(
        (status = 200, description = "All images stored", body = IngestResponse),
        (status = 400, description = "Empty batch or unsupported file type", body = ErrorBody),
        (status = 413, description = "Request body over the upload limit", body = ErrorBody),
        (status = 429, description = "Too many concurrent uploads", body = ErrorBody),
        (status = 500, description = "A file could not be stored", body = ErrorBody)
    )
)]
#[instrument(skip_all)]
pub async fn upload_images(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<IngestResponse>> {
    let _permit = limits::admit(state.limiters.uploads.as_ref()).await?;

    let limit = state.config.limits.max_upload_bytes;
    let read_error = |context: String, e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge { limit }
        } else {
            Error::BadRequest {
                message: format!("{context}: {}", e.body_text()),
            }
        }
    };

    let mut batch = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| read_error("Failed to read multipart body".to_string(), e))?
    {
        if field.name() != Some(IMAGES_FIELD) {
            debug!(field = ?field.name(), "Ignoring multipart field");
            continue;
        }

        let source_name = field.file_name().unwrap_or_default().to_string();
        let raw_bytes = field
            .bytes()
            .await
            .map_err(|e| read_error(format!("Failed to read upload {source_name:?}"), e))?;
        debug!(file = %source_name, bytes = raw_bytes.len(), "Received upload");
        batch.push(UploadTask { source_name, raw_bytes });
    }

    let results = state.ingest.ingest(batch).await?;
    Ok(Json(IngestResponse::from(results)))
}
