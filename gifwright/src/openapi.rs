//! OpenAPI document for the HTTP API, served at `/api-docs/openapi.json` and rendered at `/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::errors::{ErrorBody, ErrorKind};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "gifwright",
        description = "Upload images and assemble them into animated GIFs."
    ),
    paths(
        api::handlers::images::upload_images,
        api::handlers::animations::create_animation,
        api::handlers::animations::download_animation,
        api::handlers::blobs::get_blob,
    ),
    components(
        schemas(
            api::models::IngestResponse,
            api::models::RejectedImage,
            api::models::AnimateRequest,
            api::models::AnimateResponse,
            ErrorBody,
            ErrorKind,
        )
    ),
    tags(
        (name = "images", description = "Batch image upload. A batch is all-or-nothing unless the server runs the collect-all policy."),
        (name = "animations", description = "GIF assembly from ordered image URLs, and download of the result."),
        (name = "blobs", description = "Direct access to stored uploads and animations."),
    )
)]
pub struct ApiDoc;
