//! Boundary to the external descriptor-extraction capability.

use std::path::Path;

use thiserror::Error;

use crate::frame::Frame;
use crate::types::Descriptor;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extraction backend not loaded")]
    NotLoaded,
    #[error("no face found in {0}")]
    NoFace(String),
    #[error("extraction backend failed: {0}")]
    Backend(String),
    #[error("extraction protocol error: {0}")]
    Protocol(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns images into face descriptors.
///
/// Implementations are blocking and are driven from a single dedicated
/// thread, so at most one call is ever outstanding.
pub trait DescriptorExtractor: Send {
    /// Load models. Called once before any other method.
    fn load(&mut self) -> Result<(), ExtractError>;

    /// Best single face in `frame`, or `None` when no face is present.
    fn detect(&mut self, frame: &Frame) -> Result<Option<Descriptor>, ExtractError>;

    /// Descriptor for a registry reference image. A missing face is an error.
    fn enroll(&mut self, reference_image: &Path) -> Result<Descriptor, ExtractError>;
}
