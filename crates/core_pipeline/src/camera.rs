//! File-backed camera
//!
//! Serves the stills in a directory one per capture, in sorted order,
//! wrapping around at the end. Dimensions are the encoded (sensor) size and
//! the orientation comes from EXIF.

use async_trait::async_trait;
use image::{ImageDecoder, ImageReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use walkdir::WalkDir;

use crate::collaborators::Camera;
use crate::error::{CaptureError, CaptureResult};
use crate::types::{CaptureFrame, OrientationTag};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "tiff"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read encoded dimensions and EXIF orientation without decoding pixels
pub fn probe_still(path: &Path) -> CaptureResult<CaptureFrame> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let (width, height) = decoder.dimensions();
    let orientation = decoder
        .orientation()
        .map(|o| OrientationTag::from_exif(o.to_exif()))
        .unwrap_or(OrientationTag::Upright);

    Ok(CaptureFrame {
        width,
        height,
        orientation,
        path: Some(path.to_path_buf()),
    })
}

/// Camera that replays still images from a directory
#[derive(Debug)]
pub struct DirectoryCamera {
    files: Vec<PathBuf>,
    next: AtomicUsize,
}

impl DirectoryCamera {
    /// Scan `dir` (non-recursive) for image files
    pub fn open(dir: impl AsRef<Path>) -> CaptureResult<Self> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir.as_ref()).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| CaptureError::Camera(e.to_string()))?;
            if entry.file_type().is_file() && is_image(entry.path()) {
                files.push(entry.into_path());
            }
        }
        debug!("{} stills in {}", files.len(), dir.as_ref().display());
        Ok(Self {
            files,
            next: AtomicUsize::new(0),
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

#[async_trait]
impl Camera for DirectoryCamera {
    fn is_ready(&self) -> bool {
        !self.files.is_empty()
    }

    async fn capture(&self) -> CaptureResult<CaptureFrame> {
        if self.files.is_empty() {
            return Err(CaptureError::Camera("no stills available".to_string()));
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.files.len();
        let path = self.files[index].clone();

        tokio::task::spawn_blocking(move || probe_still(&path))
            .await
            .map_err(|e| CaptureError::Camera(format!("capture task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        ImageBuffer::from_pixel(width, height, Rgb([255u8, 255, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_empty_directory_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        let camera = DirectoryCamera::open(dir.path()).unwrap();
        assert!(!camera.is_ready());
    }

    #[test]
    fn test_probe_reads_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "menu.png", 40, 30);
        let frame = probe_still(&path).unwrap();
        assert_eq!((frame.width, frame.height), (40, 30));
        assert_eq!(frame.orientation, OrientationTag::Upright);
        assert_eq!(frame.path, Some(path));
    }

    #[tokio::test]
    async fn test_capture_cycles_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let b = write_png(dir.path(), "b.png", 20, 10);
        let a = write_png(dir.path(), "a.png", 10, 20);
        let camera = DirectoryCamera::open(dir.path()).unwrap();
        assert!(camera.is_ready());

        let first = camera.capture().await.unwrap();
        let second = camera.capture().await.unwrap();
        let third = camera.capture().await.unwrap();
        assert_eq!(first.path, Some(a.clone()));
        assert_eq!(second.path, Some(b));
        assert_eq!(third.path, Some(a));
    }

    #[tokio::test]
    async fn test_capture_from_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let camera = DirectoryCamera::open(dir.path()).unwrap();
        assert!(matches!(camera.capture().await, Err(CaptureError::Camera(_))));
    }
}
