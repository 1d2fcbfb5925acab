//! Core types for the menu scanning pipeline
//!
//! This module defines the data passed between the capture loop, the
//! coordinate reconciler, the tap resolver and the identification session.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for one identification session (one user tap)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Physical sensor rotation relative to the device's natural upright
/// orientation at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrientationTag {
    Upright,
    #[serde(rename = "rotated-90-ccw")]
    Rotated90Ccw,
    #[serde(rename = "rotated-90-cw")]
    Rotated90Cw,
    #[serde(rename = "rotated-180")]
    Rotated180,
}

impl OrientationTag {
    /// Map an EXIF orientation value (1-8) to the rotation it encodes.
    ///
    /// Mirrored variants keep only their rotation part; unknown values
    /// are treated as upright.
    pub fn from_exif(value: u8) -> Self {
        match value {
            3 | 4 => Self::Rotated180,
            5 | 6 => Self::Rotated90Cw,
            7 | 8 => Self::Rotated90Ccw,
            _ => Self::Upright,
        }
    }
}

/// How an OCR integration reports block frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingConvention {
    /// Frames are already aligned to the display orientation, but the
    /// photo dimensions may still be sensor-native
    DisplayAligned,
    /// Frames are in raw sensor-pixel space and must be rotated by the
    /// capture orientation before scaling
    SensorAligned,
}

/// One still image from the camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureFrame {
    /// Encoded width in pixels (>= 1)
    pub width: u32,
    /// Encoded height in pixels (>= 1)
    pub height: u32,
    /// Sensor rotation at capture time
    pub orientation: OrientationTag,
    /// Where the encoded still lives, if it was written to disk
    pub path: Option<PathBuf>,
}

impl CaptureFrame {
    /// Geometry needed by the reconciler, detached from the image source
    pub fn geometry(&self) -> PhotoGeometry {
        PhotoGeometry {
            width: self.width.max(1),
            height: self.height.max(1),
            orientation: self.orientation,
        }
    }
}

/// Dimensions and orientation of a captured photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoGeometry {
    pub width: u32,
    pub height: u32,
    pub orientation: OrientationTag,
}

/// A rectangle in the OCR engine's reporting space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockFrame {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// OCR output for one recognized text fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTextBlock {
    pub text: String,
    /// Absent when the engine could not locate the fragment
    pub frame: Option<BlockFrame>,
}

/// Width and height of the on-screen camera/overlay container
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewportDimensions {
    pub width: f64,
    pub height: f64,
}

impl ViewportDimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True once layout has produced a usable, non-zero size
    pub fn is_known(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }

    pub fn aspect(&self) -> f64 {
        self.width / self.height
    }
}

/// A rectangle in on-screen overlay coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewportRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewportRect {
    pub fn center(&self) -> ViewportPoint {
        ViewportPoint {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn contains(&self, point: ViewportPoint) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// A point in viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewportPoint {
    pub x: f64,
    pub y: f64,
}

impl ViewportPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: ViewportPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A point in original-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImagePoint {
    pub x: f64,
    pub y: f64,
}

/// A recognized text fragment mapped into viewport space
///
/// Serialized as `{ "text": .., "frame": { "x", "y", "width", "height" } }`,
/// which is the shape the identification service receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportTextBlock {
    pub text: String,
    pub frame: ViewportRect,
}

/// A tap on the overlay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapEvent {
    /// Touch location in viewport coordinates
    pub point: ViewportPoint,
    /// Index of the rendered rectangle that was struck, if any
    pub block_index: Option<usize>,
}

/// Structured answer from the identification service
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DishIdentification {
    pub dish_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrients: Option<String>,
}

/// Reference to a generated image: either a fetchable URL or inline data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratedImageRef(pub String);

impl GeneratedImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `data:<mime>;base64,<payload>` references
    pub fn is_inline(&self) -> bool {
        self.0.starts_with("data:") && self.0.contains(";base64,")
    }

    /// Decode an inline `data:` reference to raw image bytes.
    ///
    /// Returns `None` for URL references.
    pub fn decode_inline(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        if !self.is_inline() {
            return None;
        }
        let (_, payload) = self.0.split_once(";base64,")?;
        Some(general_purpose::STANDARD.decode(payload))
    }
}

/// Final result attached to a completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishResult {
    pub dish_name: String,
    pub description: String,
    pub image_prompt: String,
    pub price: Option<String>,
    pub nutrients: Option<String>,
    pub generated_image_ref: Option<GeneratedImageRef>,
}

impl DishResult {
    pub fn new(identification: DishIdentification, image: Option<GeneratedImageRef>) -> Self {
        Self {
            dish_name: identification.dish_name,
            description: identification.description,
            image_prompt: identification.image_prompt,
            price: identification.price,
            nutrients: identification.nutrients,
            generated_image_ref: image,
        }
    }
}

/// Opaque handle returned by the image-generation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollHandle(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_creation() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_orientation_tag_serialization() {
        let json = serde_json::to_string(&OrientationTag::Rotated90Cw).unwrap();
        assert_eq!(json, "\"rotated-90-cw\"");
        let parsed: OrientationTag = serde_json::from_str("\"upright\"").unwrap();
        assert_eq!(parsed, OrientationTag::Upright);
    }

    #[test]
    fn test_orientation_from_exif() {
        assert_eq!(OrientationTag::from_exif(1), OrientationTag::Upright);
        assert_eq!(OrientationTag::from_exif(6), OrientationTag::Rotated90Cw);
        assert_eq!(OrientationTag::from_exif(8), OrientationTag::Rotated90Ccw);
        assert_eq!(OrientationTag::from_exif(3), OrientationTag::Rotated180);
        assert_eq!(OrientationTag::from_exif(0), OrientationTag::Upright);
    }

    #[test]
    fn test_viewport_text_block_wire_shape() {
        let block = ViewportTextBlock {
            text: "Pad Thai".to_string(),
            frame: ViewportRect {
                x: 10.0,
                y: 20.0,
                width: 100.0,
                height: 18.0,
            },
        };

        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["frame"]["width"], 100.0);
        assert_eq!(json["text"], "Pad Thai");
    }

    #[test]
    fn test_identification_parses_camel_case() {
        let parsed: DishIdentification = serde_json::from_str(
            r#"{"dishName":"Pho","description":"Beef noodle soup","imagePrompt":"a bowl of pho"}"#,
        )
        .unwrap();
        assert_eq!(parsed.dish_name, "Pho");
        assert_eq!(parsed.image_prompt, "a bowl of pho");
        assert!(parsed.price.is_none());
    }

    #[test]
    fn test_generated_image_ref_inline_decoding() {
        let inline = GeneratedImageRef("data:image/png;base64,aGVsbG8=".to_string());
        assert!(inline.is_inline());
        assert_eq!(inline.decode_inline().unwrap().unwrap(), b"hello".to_vec());

        let url = GeneratedImageRef("https://cdn.example.com/a.jpg".to_string());
        assert!(!url.is_inline());
        assert!(url.decode_inline().is_none());
    }

    #[test]
    fn test_rect_center_and_contains() {
        let rect = ViewportRect {
            x: 10.0,
            y: 10.0,
            width: 20.0,
            height: 10.0,
        };
        assert_eq!(rect.center(), ViewportPoint::new(20.0, 15.0));
        assert!(rect.contains(ViewportPoint::new(30.0, 20.0)));
        assert!(!rect.contains(ViewportPoint::new(31.0, 20.0)));
    }
}
