use thiserror::Error;

use crate::shared::cancellation::CancellationToken;
use crate::shared::capture::Capture;

use super::skeleton::BodyFrame;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("inference failed: {0}")]
    Inference(String),
    /// The capture cannot be tracked (no depth, wrong size). Skipped, not fatal.
    #[error("capture is not trackable: {0}")]
    IncompatibleFrame(String),
    #[error("inference cancelled")]
    Cancelled,
    #[error("failed to load model: {0}")]
    Model(String),
}

/// Domain interface for body-tracking inference.
///
/// Implementations may hold per-stream state, hence `&mut self`. The capture
/// is borrowed; it is released by whoever owns it afterwards.
pub trait BodyTracker: Send {
    fn infer(&mut self, capture: &Capture, cancel: &CancellationToken) -> Result<BodyFrame, TrackerError>;
}
