//! Axum route handlers.
//!
//! - [`images`]: multipart image upload
//! - [`animations`]: animation creation and download
//! - [`blobs`]: raw access to stored blobs

pub mod animations;
pub mod blobs;
pub mod images;
