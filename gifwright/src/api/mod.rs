//! HTTP surface of the service.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: JSON request/response bodies
//!
//! # Endpoints
//!
//! - `POST /upload`: multipart batch of images under the `images` field
//! - `POST /animate`: build a GIF from an ordered list of image URLs
//! - `GET /download/{id}`: an animation as an attachment
//! - `GET /blobs/{key}`: any stored blob, inline
//!
//! The OpenAPI document is served at `/api-docs/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
