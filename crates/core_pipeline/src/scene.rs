//! Overlay scene
//!
//! Holds the viewport, the last raw capture and the viewport rects derived
//! from them. Rects are only ever recomputed together with the dimensions
//! they were computed for.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::reconcile::reconcile_blocks;
use crate::types::{
    PhotoGeometry, RawTextBlock, ReportingConvention, TapEvent, ViewportDimensions, ViewportPoint,
    ViewportTextBlock,
};

/// Scene shared between the capture loop and tap handling
pub type SharedScene = Arc<RwLock<OverlayScene>>;

#[derive(Debug, Clone, PartialEq)]
struct RawCapture {
    photo: PhotoGeometry,
    blocks: Vec<RawTextBlock>,
}

#[derive(Debug, Clone)]
pub struct OverlayScene {
    convention: ReportingConvention,
    viewport: ViewportDimensions,
    last_capture: Option<RawCapture>,
    blocks: Vec<ViewportTextBlock>,
}

impl OverlayScene {
    pub fn new(convention: ReportingConvention) -> Self {
        Self {
            convention,
            viewport: ViewportDimensions::default(),
            last_capture: None,
            blocks: Vec::new(),
        }
    }

    pub fn shared(convention: ReportingConvention) -> SharedScene {
        Arc::new(RwLock::new(Self::new(convention)))
    }

    pub fn convention(&self) -> ReportingConvention {
        self.convention
    }

    pub fn viewport(&self) -> ViewportDimensions {
        self.viewport
    }

    pub fn blocks(&self) -> &[ViewportTextBlock] {
        &self.blocks
    }

    /// Record a layout change and re-derive rects from the last capture
    pub fn set_viewport(&mut self, viewport: ViewportDimensions) {
        self.viewport = viewport;
        self.rederive();
    }

    /// Replace the overlay with a new capture. Returns the number of
    /// blocks now shown.
    pub fn apply_capture(&mut self, photo: PhotoGeometry, blocks: Vec<RawTextBlock>) -> usize {
        self.last_capture = Some(RawCapture { photo, blocks });
        self.rederive();
        self.blocks.len()
    }

    pub fn clear(&mut self) {
        self.last_capture = None;
        self.blocks.clear();
    }

    /// Build a tap event, noting which block (if any) was struck directly
    pub fn tap_at(&self, point: ViewportPoint) -> TapEvent {
        TapEvent {
            point,
            block_index: self.blocks.iter().position(|b| b.frame.contains(point)),
        }
    }

    fn rederive(&mut self) {
        self.blocks = match (&self.last_capture, self.viewport.is_known()) {
            (Some(capture), true) => {
                reconcile_blocks(&capture.blocks, capture.photo, self.convention, self.viewport)
            }
            _ => Vec::new(),
        };
    }
}
