use thiserror::Error;

use crate::shared::frame::Frame;
use crate::shared::geometry::DetectionBox;

/// Domain interface for face detection.
///
/// Returns one batch of boxes in the frame's intrinsic pixel coordinates.
/// An empty batch is a valid result. Callers never invoke `detect` again
/// before the previous call has returned.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionBox>, Box<dyn std::error::Error>>;
}

/// A detection call that failed, carried across threads as its message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("detection failed: {0}")]
pub struct DetectionFailure(pub String);

impl DetectionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<Box<dyn std::error::Error>> for DetectionFailure {
    fn from(e: Box<dyn std::error::Error>) -> Self {
        Self(e.to_string())
    }
}
