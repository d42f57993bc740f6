use axum::{
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};

use crate::{
    AppState,
    errors::{Error, ErrorBody, Result},
    storage::StorageError,
};

#[utoipa::path(
    get,
    path = "/blobs/{key}",
    tag = "blobs",
    summary = "Get stored blob",
    description = "Serves an uploaded image or a created animation inline. This is where `imageUrls` and \
                   `animationUrl` point when the blob store is local or in-memory.",
    params(
        ("key" = String, Path, description = "Blob key"),
    ),
    responses(
        (status = 200, description = "Blob content"),
        (status = 404, description = "No such blob", body = ErrorBody)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_blob(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response> {
    let content = state.store.get(&key).await.map_err(|e| match e {
        StorageError::NotFound | StorageError::InvalidKey(_) => Error::NotFound {
            resource: "Blob".to_string(),
            id: key.clone(),
        },
        source => Error::StoreReadFailed {
            what: format!("blob {key}"),
            source,
        },
    })?;

    let content_type = mime_guess::from_path(&key).first_or_octet_stream();
    let content_type = HeaderValue::from_str(content_type.essence_str()).unwrap_or(HeaderValue::from_static("application/octet-stream"));

    Ok(([(header::CONTENT_TYPE, content_type)], content).into_response())
}
