use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::{AnimateRequest, AnimateResponse},
    errors::{Error, ErrorBody, Result},
    limits,
    pipeline::{AnimateOptions, GIF_CONTENT_TYPE},
    storage::{StorageError, is_valid_key},
};

#[utoipa::path(
    post,
    path = "/animate",
    tag = "animations",
    summary = "Create animation",
    description = "Fetch the given images, in order, and encode them as one looping GIF. Each frame gets its own palette. \
                   All images must share the dimensions of the first.",
    request_body = AnimateRequest,
    responses(
        (status = 200, description = "Animation stored", body = AnimateResponse),
        (status = 400, description = "Empty URL list or invalid options", body = ErrorBody),
        (status = 429, description = "Too many concurrent animations", body = ErrorBody),
        (status = 500, description = "An image could not be read, decoded or encoded, or the animation could not be stored", body = ErrorBody),
        (status = 502, description = "A remote image could not be fetched, or the animation was stored but archiving failed", body = ErrorBody)
    )
)]
#[instrument(skip_all, fields(frames = tracing::field::Empty))]
pub async fn create_animation(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AnimateRequest>, JsonRejection>,
) -> Result<Json<AnimateResponse>> {
    let Json(request) = payload.map_err(|rejection| Error::BadRequest {
        message: format!("Invalid animation request: {}", rejection.body_text()),
    })?;
    tracing::Span::current().record("frames", request.image_urls.len());

    // Reject before queueing for a slot
    if request.image_urls.is_empty() {
        return Err(Error::EmptyInput {
            what: "image URLs".to_string(),
        });
    }

    let _permit = limits::admit(state.limiters.animations.as_ref()).await?;

    let options = AnimateOptions {
        archive: request.archive,
        frame_delays: request.frame_delays,
    };
    let result = state.pipeline.animate(&request.image_urls, options).await?;

    Ok(Json(AnimateResponse::from(result)))
}

#[utoipa::path(
    get,
    path = "/download/{id}",
    tag = "animations",
    summary = "Download animation",
    description = "Returns a previously created animation as a file attachment.",
    params(
        ("id" = String, Path, description = "Animation key, as found at the end of `downloadUrl`"),
    ),
    responses(
        (status = 200, description = "GIF bytes", content_type = "image/gif"),
        (status = 404, description = "No such animation", body = ErrorBody),
        (status = 500, description = "The animation could not be read", body = ErrorBody)
    )
)]
#[instrument(skip(state))]
pub async fn download_animation(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    let not_found = || Error::NotFound {
        resource: "Animation".to_string(),
        id: id.clone(),
    };

    if !id.ends_with(".gif") || !is_valid_key(&id) {
        return Err(not_found());
    }

    let content = match state.store.get(&id).await {
        Ok(content) => content,
        Err(StorageError::NotFound) => return Err(not_found()),
        Err(source) => {
            return Err(Error::StoreReadFailed {
                what: format!("animation {id}"),
                source,
            });
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(GIF_CONTENT_TYPE));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{id}\"")).map_err(|e| Error::Internal {
        operation: format!("build Content-Disposition header: {e}"),
    })?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok((headers, content).into_response())
}
