//! Frame source backed by an image file that another process keeps current.

use std::path::{Path, PathBuf};

use checkpoint_core::Frame;

use crate::{CameraError, VideoSource};

/// Reads the file at `path` on every request and converts it to luma.
pub struct SnapshotSource {
    path: PathBuf,
    sequence: u32,
}

impl SnapshotSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(CameraError::DeviceNotFound(path.display().to_string()));
        }
        tracing::info!(path = %path.display(), "snapshot source opened");
        Ok(Self { path, sequence: 0 })
    }
}

impl VideoSource for SnapshotSource {
    fn current_frame(&mut self) -> Result<Frame, CameraError> {
        let image = image::open(&self.path).map_err(|e| match e {
            image::ImageError::IoError(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(self.path.display().to_string())
            }
            image::ImageError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
                CameraError::DeviceNotFound(self.path.display().to_string())
            }
            other => CameraError::CaptureFailed(format!("{}: {other}", self.path.display())),
        })?;

        let luma = image.to_luma8();
        let (width, height) = luma.dimensions();
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(Frame::new(luma.into_raw(), width, height, sequence))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_luma_and_counts_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.png");
        image::GrayImage::from_pixel(4, 3, image::Luma([200u8])).save(&path).unwrap();

        let mut source = SnapshotSource::open(&path).unwrap();
        let first = source.current_frame().unwrap();
        assert_eq!((first.width, first.height), (4, 3));
        assert!(first.data.iter().all(|&p| p == 200));
        assert_eq!(first.sequence, 0);
        assert_eq!(source.current_frame().unwrap().sequence, 1);
    }

    #[test]
    fn test_missing_file_is_device_error() {
        assert!(matches!(
            SnapshotSource::open("/nonexistent/frame.png"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_file_removed_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.png");
        image::GrayImage::new(2, 2).save(&path).unwrap();
        let mut source = SnapshotSource::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(source.current_frame().is_err());
    }
}
