use std::time::Duration;

use thiserror::Error;

use crate::shared::calibration::Calibration;
use crate::shared::cancellation::CancellationToken;
use crate::shared::capture::Capture;

/// Outcome of a single bounded read from a frame source.
#[derive(Debug)]
pub enum SourceRead {
    Capture(Capture),
    /// Nothing arrived within the wait; try again.
    Timeout,
    /// The source is exhausted (end of a recording). Not an error.
    EndOfStream,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameSourceError {
    /// May succeed if retried (device hiccup, interrupted read).
    #[error("transient acquisition error: {0}")]
    Transient(String),
    #[error("acquisition failed: {0}")]
    Fatal(String),
}

impl FrameSourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FrameSourceError::Transient(_))
    }
}

/// Where captures come from: a live device or a recording.
///
/// Releasing a capture is dropping it, so the boundary only needs the read.
pub trait FrameSource: Send {
    /// Waits at most `timeout` for the next capture. Implementations that
    /// block must return early once `cancel` is set.
    fn try_get_next(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<SourceRead, FrameSourceError>;

    /// Calibration of the sensor that produced the captures.
    fn calibration(&self) -> Result<Calibration, FrameSourceError>;

    /// Human-readable name, e.g. for a window title.
    fn description(&self) -> String;
}
