//! Classification of image-generation poll responses
//!
//! The job service is not uniform about where a finished image shows up,
//! so each known field is checked in a fixed priority order.

use serde_json::Value;

use crate::types::GeneratedImageRef;

/// FLUX job states that end the job without an image
const FAILED_STATUSES: [&str; 4] = ["Error", "Failed", "Content Moderated", "Request Moderated"];

/// What one poll response says about the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Ready(GeneratedImageRef),
    Failed(String),
    Pending,
}

impl PollStatus {
    pub fn from_response(response: &Value) -> Self {
        if let Some(image) = ready_image(response) {
            return Self::Ready(GeneratedImageRef(image.to_string()));
        }

        if let Some(error) = non_empty_str(response.get("error")) {
            let detail = non_empty_str(response.get("message"))
                .or_else(|| non_empty_str(response.get("details")));
            return Self::Failed(match detail {
                Some(detail) => format!("{error}: {detail}"),
                None => error.to_string(),
            });
        }

        if let Some(status) = non_empty_str(response.get("status")) {
            if FAILED_STATUSES.contains(&status) {
                return Self::Failed(format!("Image job ended with status {status}"));
            }
        }

        Self::Pending
    }
}

fn ready_image(response: &Value) -> Option<&str> {
    non_empty_str(response.pointer("/result/sample"))
        .or_else(|| non_empty_str(response.get("image_url")))
        .or_else(|| non_empty_str(response.get("url")))
        .or_else(|| non_empty_str(response.get("imageUrl")))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
