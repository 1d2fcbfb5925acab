//! OCR adapters
//!
//! Both adapters report block frames in the encoded pixel space of the
//! captured still, i.e. [`ReportingConvention::SensorAligned`].

pub mod tsv;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::collaborators::TextRecognizer;
use crate::error::{CaptureError, CaptureResult};
use crate::types::{CaptureFrame, RawTextBlock, ReportingConvention};

pub use tsv::parse_tsv_blocks;

/// Convention of every adapter in this module
pub const ADAPTER_CONVENTION: ReportingConvention = ReportingConvention::SensorAligned;

fn frame_path(frame: &CaptureFrame) -> CaptureResult<&Path> {
    frame
        .path
        .as_deref()
        .ok_or_else(|| CaptureError::Recognition("capture has no image path".to_string()))
}

/// Reads precomputed Tesseract TSV stored beside the image (`menu.jpg` -> `menu.tsv`)
#[derive(Debug, Clone, Default)]
pub struct SidecarRecognizer;

impl SidecarRecognizer {
    pub fn sidecar_path(image: &Path) -> PathBuf {
        image.with_extension("tsv")
    }
}

#[async_trait]
impl TextRecognizer for SidecarRecognizer {
    async fn recognize(&self, frame: &CaptureFrame) -> CaptureResult<Vec<RawTextBlock>> {
        let sidecar = Self::sidecar_path(frame_path(frame)?);
        let tsv = tokio::fs::read_to_string(&sidecar).await?;
        let blocks = parse_tsv_blocks(&tsv);
        debug!("{} blocks from {}", blocks.len(), sidecar.display());
        Ok(blocks)
    }
}

/// Runs Tesseract (via leptess) on the captured still
#[cfg(feature = "tesseract")]
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    language: String,
}

#[cfg(feature = "tesseract")]
impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
        }
    }
}

#[cfg(feature = "tesseract")]
impl TesseractRecognizer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    fn run(language: &str, image: &Path) -> CaptureResult<String> {
        let mut tesseract = leptess::LepTess::new(None, language).map_err(|e| {
            CaptureError::Recognition(format!(
                "Failed to initialize Tesseract. Is Tesseract installed? ({e})"
            ))
        })?;
        tesseract
            .set_image(image)
            .map_err(|e| CaptureError::Recognition(format!("Failed to load image: {e}")))?;
        tesseract
            .get_tsv_text(0)
            .map_err(|e| CaptureError::Recognition(format!("Failed to extract text: {e}")))
    }
}

#[cfg(feature = "tesseract")]
#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, frame: &CaptureFrame) -> CaptureResult<Vec<RawTextBlock>> {
        let image = frame_path(frame)?.to_path_buf();
        let language = self.language.clone();
        let tsv = tokio::task::spawn_blocking(move || Self::run(&language, &image))
            .await
            .map_err(|e| CaptureError::Recognition(format!("OCR task failed: {e}")))??;
        Ok(parse_tsv_blocks(&tsv))
    }
}
