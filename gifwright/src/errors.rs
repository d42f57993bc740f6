use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

use crate::imaging::ImagingError;
use crate::storage::StorageError;

/// Stable, machine-readable error category returned alongside every error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyInput,
    UnsupportedFormat,
    InvalidRequest,
    PayloadTooLarge,
    DecodeFailed,
    EmptyFrame,
    NoFrames,
    EncodeFailed,
    FetchFailed,
    StoreWriteFailed,
    StoreReadFailed,
    ArchiveFailed,
    NotFound,
    TooManyRequests,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyInput => "empty_input",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::DecodeFailed => "decode_failed",
            ErrorKind::EmptyFrame => "empty_frame",
            ErrorKind::NoFrames => "no_frames",
            ErrorKind::EncodeFailed => "encode_failed",
            ErrorKind::FetchFailed => "fetch_failed",
            ErrorKind::StoreWriteFailed => "store_write_failed",
            ErrorKind::StoreReadFailed => "store_read_failed",
            ErrorKind::ArchiveFailed => "archive_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TooManyRequests => "too_many_requests",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// A batch or URL list with nothing in it
    #[error("No {what} provided")]
    EmptyInput { what: String },

    /// File extension outside the allow-list
    #[error("Unsupported file type for {source_name:?}: accepted extensions are {allowed}")]
    UnsupportedFormat { source_name: String, allowed: String },

    /// Malformed request body or parameters
    #[error("{message}")]
    BadRequest { message: String },

    /// Request body exceeds the configured limit
    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    /// Source image bytes could not be decoded
    #[error("Failed to decode image {index} ({url}): {message}")]
    DecodeFailed { index: usize, url: String, message: String },

    /// Source image decoded to zero pixels
    #[error("Image {index} ({url}) has no pixels")]
    EmptyFrame { index: usize, url: String },

    /// Encoder invoked without frames
    #[error("No frames to encode")]
    NoFrames,

    /// Container-level encoding failure (frame size mismatch, oversized canvas, ...)
    #[error("Failed to encode animation: {message}")]
    EncodeFailed { message: String },

    /// Image URL outside the blob store could not be fetched
    #[error("Failed to fetch image {index} from {url}: {message}")]
    FetchFailed { index: usize, url: String, message: String },

    /// Blob store write failure
    #[error("Failed to store {what}: {source}")]
    StoreWriteFailed {
        what: String,
        #[source]
        source: StorageError,
    },

    /// Blob store read failure
    #[error("Failed to read {what}: {source}")]
    StoreReadFailed {
        what: String,
        #[source]
        source: StorageError,
    },

    /// The animation was stored but the secondary archive write failed
    #[error("Animation stored at {animation_url} but archiving failed: {message}")]
    ArchiveFailed {
        animation_url: String,
        download_url: String,
        message: String,
    },

    /// Requested resource not found
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// Admission control rejected the request
    #[error("{message}")]
    TooManyRequests { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Human-readable description
    pub error: String,
    pub kind: ErrorKind,
    /// Set for `archive_failed`: the animation exists and can be fetched here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_url: Option<String>,
    /// Set for `archive_failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl Error {
    /// Attach frame context to an error raised while decoding or quantizing one source image
    pub fn from_imaging(err: ImagingError, index: usize, url: &str) -> Self {
        match err {
            ImagingError::EmptyFrame { .. } => Error::EmptyFrame {
                index,
                url: url.to_string(),
            },
            other => Error::DecodeFailed {
                index,
                url: url.to_string(),
                message: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyInput { .. } => ErrorKind::EmptyInput,
            Error::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Error::BadRequest { .. } => ErrorKind::InvalidRequest,
            Error::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Error::DecodeFailed { .. } => ErrorKind::DecodeFailed,
            Error::EmptyFrame { .. } => ErrorKind::EmptyFrame,
            Error::NoFrames => ErrorKind::NoFrames,
            Error::EncodeFailed { .. } => ErrorKind::EncodeFailed,
            Error::FetchFailed { .. } => ErrorKind::FetchFailed,
            Error::StoreWriteFailed { .. } => ErrorKind::StoreWriteFailed,
            Error::StoreReadFailed { .. } => ErrorKind::StoreReadFailed,
            Error::ArchiveFailed { .. } => ErrorKind::ArchiveFailed,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::TooManyRequests { .. } => ErrorKind::TooManyRequests,
            Error::Internal { .. } | Error::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::EmptyInput | ErrorKind::UnsupportedFormat | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::FetchFailed | ErrorKind::ArchiveFailed => StatusCode::BAD_GATEWAY,
            ErrorKind::DecodeFailed
            | ErrorKind::EmptyFrame
            | ErrorKind::NoFrames
            | ErrorKind::EncodeFailed
            | ErrorKind::StoreWriteFailed
            | ErrorKind::StoreReadFailed
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::StoreWriteFailed { what, .. } => format!("Failed to store {what}"),
            Error::StoreReadFailed { what, source } => match source {
                StorageError::NotFound => format!("Failed to read {what}: not found"),
                _ => format!("Failed to read {what}"),
            },
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } | Error::Other(_) | Error::StoreWriteFailed { .. } | Error::StoreReadFailed { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::ArchiveFailed { .. } | Error::FetchFailed { .. } => {
                tracing::warn!("Upstream error: {}", self);
            }
            Error::DecodeFailed { .. } | Error::EmptyFrame { .. } | Error::NoFrames | Error::EncodeFailed { .. } => {
                tracing::warn!("Animation error: {}", self);
            }
            Error::TooManyRequests { .. } => {
                tracing::info!("Request rejected by admission control: {}", self);
            }
            Error::EmptyInput { .. }
            | Error::UnsupportedFormat { .. }
            | Error::BadRequest { .. }
            | Error::PayloadTooLarge { .. }
            | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let (animation_url, download_url) = match &self {
            Error::ArchiveFailed {
                animation_url,
                download_url,
                ..
            } => (Some(animation_url.clone()), Some(download_url.clone())),
            _ => (None, None),
        };

        let body = ErrorBody {
            error: self.user_message(),
            kind: self.kind(),
            animation_url,
            download_url,
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Encoder-stage imaging errors; per-frame errors go through [`Error::from_imaging`]
impl From<ImagingError> for Error {
    fn from(err: ImagingError) -> Self {
        match err {
            ImagingError::NoFrames => Error::NoFrames,
            other => Error::EncodeFailed { message: other.to_string() },
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
