use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ErrorKind;
use crate::ingest::ValidationResult;
use crate::pipeline::AnimationResult;

/// Result of an upload batch
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// Public URLs of the stored images, in upload order
    pub image_urls: Vec<String>,
    /// Files that were not stored; only reported under the collect-all policy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedImage>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RejectedImage {
    pub source_name: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<Vec<ValidationResult>> for IngestResponse {
    fn from(results: Vec<ValidationResult>) -> Self {
        let mut response = IngestResponse {
            image_urls: Vec::with_capacity(results.len()),
            rejected: Vec::new(),
        };
        for result in results {
            match result {
                ValidationResult::Accepted { stored_url, .. } => response.image_urls.push(stored_url),
                ValidationResult::Rejected {
                    source_name,
                    reason,
                    message,
                } => response.rejected.push(RejectedImage {
                    source_name,
                    kind: reason,
                    message,
                }),
            }
        }
        response
    }
}

/// Animation request
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnimateRequest {
    /// Frame sources in display order. URLs returned by `/upload` are read from the blob store;
    /// other URLs are fetched over HTTP.
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Per-frame display time in hundredths of a second, one per URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_delays: Option<Vec<u16>>,
    /// Also copy the animation to the archive store (defaults to the server setting)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnimateResponse {
    /// Public URL of the stored animation
    pub animation_url: String,
    /// Service-relative path that downloads the animation as an attachment
    pub download_url: String,
    pub frame_count: usize,
    pub archived: bool,
}

impl From<AnimationResult> for AnimateResponse {
    fn from(result: AnimationResult) -> Self {
        Self {
            animation_url: result.stored_url,
            download_url: result.download_path,
            frame_count: result.frame_count,
            archived: result.archived,
        }
    }
}
