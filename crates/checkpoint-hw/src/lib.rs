//! checkpoint-hw: video sources for the checkpoint detection loop.
//!
//! A V4L2 camera for live capture and a snapshot-file source for setups
//! where another process keeps the current frame on disk.

pub mod camera;
pub mod pixel;
pub mod snapshot;

pub use camera::Camera;
pub use snapshot::SnapshotSource;

use checkpoint_core::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Something that can hand out the current frame on request.
pub trait VideoSource: Send {
    fn current_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable identity for logs.
    fn describe(&self) -> String;
}

/// Open the source named by `spec`: `file:<path>` for a snapshot file,
/// anything else is a V4L2 device path.
pub fn open_source(spec: &str) -> Result<Box<dyn VideoSource>, CameraError> {
    match spec.strip_prefix("file:") {
        Some(path) => Ok(Box::new(SnapshotSource::open(path)?)),
        None => Ok(Box::new(Camera::open(spec)?)),
    }
}
