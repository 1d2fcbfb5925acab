//! Interfaces to the external collaborators of the pipeline
//!
//! Concrete implementations live in `llm_bridge` (remote services) and in
//! [`crate::camera`] / [`crate::ocr`] (local capture). Tests substitute
//! in-memory doubles.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CaptureResult, ServiceResult};
use crate::types::{
    CaptureFrame, DishIdentification, PollHandle, RawTextBlock, ViewportPoint, ViewportTextBlock,
};

/// Still-image camera
#[async_trait]
pub trait Camera: Send + Sync {
    /// True once the device handle exists and is initialized
    fn is_ready(&self) -> bool;

    async fn capture(&self) -> CaptureResult<CaptureFrame>;
}

/// On-device text recognition
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, frame: &CaptureFrame) -> CaptureResult<Vec<RawTextBlock>>;
}

/// Semantic grouping of OCR fragments into one dish
#[async_trait]
pub trait DishIdentifier: Send + Sync {
    /// `Ok(None)` means the service answered but found no dish.
    async fn identify(
        &self,
        tap: ViewportPoint,
        blocks: &[ViewportTextBlock],
    ) -> ServiceResult<Option<DishIdentification>>;
}

/// Asynchronous image-generation job service
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn start_generation(&self, prompt: &str) -> ServiceResult<PollHandle>;

    /// Raw job status; see [`crate::poll::PollStatus::from_response`]
    async fn poll(&self, handle: &PollHandle) -> ServiceResult<Value>;
}
