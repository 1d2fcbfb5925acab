//! Tap resolver
//!
//! Inverse mapping from a touch in viewport space back into original-image
//! space, plus nearest-text selection for UI context.

use crate::types::{ImagePoint, ViewportDimensions, ViewportPoint, ViewportTextBlock};

/// Map a touch on a "contain"-mode render back to original image pixels.
///
/// Returns `None` when the touch falls in the letterbox/pillarbox margin or
/// when either size is unknown.
pub fn touch_to_image(
    touch: ViewportPoint,
    view: ViewportDimensions,
    image_width: f64,
    image_height: f64,
) -> Option<ImagePoint> {
    if !view.is_known() || image_width <= 0.0 || image_height <= 0.0 {
        return None;
    }

    let view_ratio = view.aspect();
    let image_ratio = image_width / image_height;

    let (render_width, render_height, offset_x, offset_y) = if view_ratio > image_ratio {
        // Pillarbox: bars left and right
        let render_height = view.height;
        let render_width = render_height * image_ratio;
        (render_width, render_height, (view.width - render_width) / 2.0, 0.0)
    } else {
        // Letterbox: bars top and bottom
        let render_width = view.width;
        let render_height = render_width / image_ratio;
        (render_width, render_height, 0.0, (view.height - render_height) / 2.0)
    };

    if touch.x < offset_x
        || touch.x > offset_x + render_width
        || touch.y < offset_y
        || touch.y > offset_y + render_height
    {
        return None;
    }

    let rel_x = (touch.x - offset_x) / render_width;
    let rel_y = (touch.y - offset_y) / render_height;

    Some(ImagePoint {
        x: rel_x * image_width,
        y: rel_y * image_height,
    })
}

/// Index of the block whose center is closest to `point`.
///
/// Ties go to the first block encountered.
pub fn nearest_block_index(point: ViewportPoint, blocks: &[ViewportTextBlock]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, block) in blocks.iter().enumerate() {
        let distance = point.distance_to(block.frame.center());
        match best {
            Some((_, min)) if distance >= min => {}
            _ => best = Some((index, distance)),
        }
    }
    best.map(|(index, _)| index)
}

/// Text of the block nearest to `point`, or an empty string
pub fn nearest_text(point: ViewportPoint, blocks: &[ViewportTextBlock]) -> String {
    nearest_block_index(point, blocks)
        .map(|index| blocks[index].text.clone())
        .unwrap_or_default()
}
