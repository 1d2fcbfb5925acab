//! Coordinate reconciler
//!
//! Maps an OCR block frame (photo pixel space) into the coordinate space of
//! the on-screen overlay. The camera preview is rendered in "cover" mode:
//! the photo is scaled uniformly until it fills the viewport and the
//! overflowing dimension is cropped symmetrically.
//!
//! The mapping runs in four stages:
//! 1. orient: a per-convention strategy decides how the frame must be
//!    rotated to line up with the display
//! 2. cover: subtract the symmetric crop and scale into the viewport
//! 3. container correction: when the working space is a "virtual landscape"
//!    (device held landscape, layout still portrait) rotate the result back
//!    into the portrait container
//! 4. clamp to the viewport bounds

use crate::types::{
    BlockFrame, OrientationTag, PhotoGeometry, RawTextBlock, ReportingConvention,
    ViewportDimensions, ViewportRect, ViewportTextBlock,
};

/// A rotation applied to a rectangle around its container's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Cw90,
    Ccw90,
    Half,
}

impl Rotation {
    pub fn inverse(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Cw90 => Self::Ccw90,
            Self::Ccw90 => Self::Cw90,
            Self::Half => Self::Half,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Cw90 | Self::Ccw90)
    }
}

/// Rotate `frame`, which lives in a `width` x `height` container.
///
/// Returns the rotated frame together with the rotated container size.
pub fn rotate_frame(
    frame: BlockFrame,
    width: f64,
    height: f64,
    rotation: Rotation,
) -> (BlockFrame, f64, f64) {
    match rotation {
        Rotation::None => (frame, width, height),
        Rotation::Cw90 => (
            BlockFrame {
                left: height - frame.top - frame.height,
                top: frame.left,
                width: frame.height,
                height: frame.width,
            },
            height,
            width,
        ),
        Rotation::Ccw90 => (
            BlockFrame {
                left: frame.top,
                top: width - frame.left - frame.width,
                width: frame.height,
                height: frame.width,
            },
            height,
            width,
        ),
        Rotation::Half => (
            BlockFrame {
                left: width - frame.left - frame.width,
                top: height - frame.top - frame.height,
                width: frame.width,
                height: frame.height,
            },
            width,
            height,
        ),
    }
}

/// A frame after the orient stage, with the photo footprint it lives in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Oriented {
    pub frame: BlockFrame,
    pub effective_width: f64,
    pub effective_height: f64,
    /// Rotation that maps the cover-mode result back into the real container
    pub container_correction: Option<Rotation>,
}

impl Oriented {
    fn is_landscape(&self) -> bool {
        self.effective_width > self.effective_height
    }
}

/// Strategy for frames that already follow the display orientation.
///
/// Only the photo dimensions may be sensor-native: when their portrait-ness
/// disagrees with the viewport the frame is turned a quarter to match.
pub fn orient_display_aligned(
    frame: BlockFrame,
    photo: PhotoGeometry,
    viewport: ViewportDimensions,
) -> Oriented {
    let photo_portrait = photo.height > photo.width;
    let rotation = if viewport.is_portrait() == photo_portrait {
        Rotation::None
    } else {
        Rotation::Ccw90
    };

    let (frame, effective_width, effective_height) =
        rotate_frame(frame, photo.width as f64, photo.height as f64, rotation);

    Oriented {
        frame,
        effective_width,
        effective_height,
        container_correction: None,
    }
}

/// Strategy for frames reported in raw sensor space.
pub fn orient_sensor_aligned(
    frame: BlockFrame,
    photo: PhotoGeometry,
    viewport: ViewportDimensions,
) -> Oriented {
    let rotation = sensor_rotation(photo, viewport);
    let (frame, effective_width, effective_height) =
        rotate_frame(frame, photo.width as f64, photo.height as f64, rotation);

    let mut oriented = Oriented {
        frame,
        effective_width,
        effective_height,
        container_correction: None,
    };

    // Landscape working space inside a portrait container
    if oriented.is_landscape() && viewport.is_portrait() {
        oriented.container_correction = Some(match photo.orientation {
            OrientationTag::Upright | OrientationTag::Rotated90Cw => Rotation::Cw90,
            OrientationTag::Rotated180 | OrientationTag::Rotated90Ccw => Rotation::Ccw90,
        });
    }

    oriented
}

fn sensor_rotation(photo: PhotoGeometry, viewport: ViewportDimensions) -> Rotation {
    let photo_landscape = photo.width > photo.height;
    let display_landscape = viewport.is_landscape();

    match photo.orientation {
        OrientationTag::Rotated90Ccw if !display_landscape => Rotation::Ccw90,
        OrientationTag::Rotated90Cw if !display_landscape => Rotation::Cw90,
        OrientationTag::Rotated90Ccw | OrientationTag::Rotated90Cw => Rotation::None,
        // An upright tag on a landscape photo under a portrait layout means the
        // device was held landscape: photo and device already agree.
        OrientationTag::Upright if photo_landscape && !display_landscape => Rotation::None,
        OrientationTag::Upright if display_landscape && !photo_landscape => Rotation::Cw90,
        OrientationTag::Upright => Rotation::None,
        OrientationTag::Rotated180 => Rotation::Half,
    }
}

/// Select the orient strategy for a reporting convention
pub fn orient(
    convention: ReportingConvention,
    frame: BlockFrame,
    photo: PhotoGeometry,
    viewport: ViewportDimensions,
) -> Oriented {
    match convention {
        ReportingConvention::DisplayAligned => orient_display_aligned(frame, photo, viewport),
        ReportingConvention::SensorAligned => orient_sensor_aligned(frame, photo, viewport),
    }
}

/// Symmetric crop of a cover-mode render
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverCrop {
    pub offset_x: f64,
    pub offset_y: f64,
    pub visible_width: f64,
    pub visible_height: f64,
}

/// Compute the part of a `width` x `height` photo that stays visible when it
/// covers a container with the given aspect ratio.
pub fn cover_crop(width: f64, height: f64, container_aspect: f64) -> CoverCrop {
    let photo_aspect = width / height;
    let mut crop = CoverCrop {
        offset_x: 0.0,
        offset_y: 0.0,
        visible_width: width,
        visible_height: height,
    };

    if photo_aspect > container_aspect {
        crop.visible_width = height * container_aspect;
        crop.offset_x = (width - crop.visible_width) / 2.0;
    } else if photo_aspect < container_aspect {
        crop.visible_height = width / container_aspect;
        crop.offset_y = (height - crop.visible_height) / 2.0;
    }

    crop
}

/// Map one OCR frame into viewport space.
///
/// Pure and deterministic. Frames that fall partly or wholly in the cropped
/// margin are clamped to the viewport, so the result may have zero area.
pub fn reconcile(
    frame: BlockFrame,
    photo: PhotoGeometry,
    convention: ReportingConvention,
    viewport: ViewportDimensions,
) -> ViewportRect {
    if !viewport.is_known() || photo.width == 0 || photo.height == 0 {
        return ViewportRect::default();
    }

    let oriented = orient(convention, frame, photo, viewport);

    let (work_width, work_height) = if oriented.container_correction.is_some() {
        (viewport.height, viewport.width)
    } else {
        (viewport.width, viewport.height)
    };

    let crop = cover_crop(
        oriented.effective_width,
        oriented.effective_height,
        work_width / work_height,
    );
    let scale_x = work_width / crop.visible_width;
    let scale_y = work_height / crop.visible_height;

    let scaled = BlockFrame {
        left: (oriented.frame.left - crop.offset_x) * scale_x,
        top: (oriented.frame.top - crop.offset_y) * scale_y,
        width: oriented.frame.width * scale_x,
        height: oriented.frame.height * scale_y,
    };

    let placed = match oriented.container_correction {
        Some(rotation) => rotate_frame(scaled, work_width, work_height, rotation).0,
        None => scaled,
    };

    clamp_to_viewport(placed, viewport)
}

fn clamp_to_viewport(frame: BlockFrame, viewport: ViewportDimensions) -> ViewportRect {
    let x0 = frame.left.clamp(0.0, viewport.width);
    let y0 = frame.top.clamp(0.0, viewport.height);
    let x1 = (frame.left + frame.width).clamp(0.0, viewport.width);
    let y1 = (frame.top + frame.height).clamp(0.0, viewport.height);

    ViewportRect {
        x: x0,
        y: y0,
        width: (x1 - x0).max(0.0),
        height: (y1 - y0).max(0.0),
    }
}

/// Reconcile every located block of one capture.
///
/// Blocks without a frame are dropped.
pub fn reconcile_blocks(
    blocks: &[RawTextBlock],
    photo: PhotoGeometry,
    convention: ReportingConvention,
    viewport: ViewportDimensions,
) -> Vec<ViewportTextBlock> {
    blocks
        .iter()
        .filter_map(|block| {
            block.frame.map(|frame| ViewportTextBlock {
                text: block.text.clone(),
                frame: reconcile(frame, photo, convention, viewport),
            })
        })
        .collect()
}
