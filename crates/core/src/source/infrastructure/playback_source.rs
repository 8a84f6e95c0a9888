use std::time::{Duration, Instant};

use crate::recording::infrastructure::recording_error::RecordingError;
use crate::recording::infrastructure::recording_reader::RecordingReader;
use crate::shared::calibration::Calibration;
use crate::shared::cancellation::CancellationToken;
use crate::shared::capture::Capture;
use crate::shared::timestamp::Timestamp;
use crate::source::domain::frame_source::{FrameSource, FrameSourceError, SourceRead};

/// Longest single sleep while pacing, so cancellation is noticed quickly.
const PACING_SLICE: Duration = Duration::from_millis(10);

/// `FrameSource` that replays a recording front to back.
///
/// With real-time pacing enabled, captures are released according to their
/// device timestamps relative to the first one, as a live device would.
pub struct PlaybackSource {
    reader: RecordingReader,
    real_time: bool,
    held: Option<Capture>,
    anchor: Option<(Instant, Timestamp)>,
}

impl PlaybackSource {
    pub fn new(reader: RecordingReader) -> Self {
        Self {
            reader,
            real_time: false,
            held: None,
            anchor: None,
        }
    }

    pub fn with_real_time_pacing(mut self, enabled: bool) -> Self {
        self.real_time = enabled;
        self
    }

    pub fn reader(&self) -> &RecordingReader {
        &self.reader
    }

    fn read_next(&mut self) -> Result<Option<Capture>, FrameSourceError> {
        if let Some(capture) = self.held.take() {
            return Ok(Some(capture));
        }
        self.reader.next_capture().map_err(to_source_error)
    }

    /// Time until `capture` is due, or `None` if it is due now.
    fn remaining(&mut self, capture: &Capture) -> Option<Duration> {
        let timestamp = capture.timestamp();
        let (start, first) = *self.anchor.get_or_insert((Instant::now(), timestamp));
        let due = start + timestamp.saturating_sub(first);
        due.checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
    }
}

impl FrameSource for PlaybackSource {
    fn try_get_next(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<SourceRead, FrameSourceError> {
        if cancel.is_cancelled() {
            return Ok(SourceRead::Timeout);
        }
        let Some(capture) = self.read_next()? else {
            return Ok(SourceRead::EndOfStream);
        };
        if !self.real_time {
            return Ok(SourceRead::Capture(capture));
        }

        let deadline = Instant::now() + timeout;
        while let Some(wait) = self.remaining(&capture) {
            let now = Instant::now();
            if now >= deadline || cancel.is_cancelled() {
                self.held = Some(capture);
                return Ok(SourceRead::Timeout);
            }
            std::thread::sleep(wait.min(PACING_SLICE).min(deadline - now));
        }
        Ok(SourceRead::Capture(capture))
    }

    fn calibration(&self) -> Result<Calibration, FrameSourceError> {
        self.reader
            .calibration()
            .map_err(|e| FrameSourceError::Fatal(e.to_string()))
    }

    fn description(&self) -> String {
        self.reader.to_string()
    }
}

fn to_source_error(err: RecordingError) -> FrameSourceError {
    if err.is_transient() {
        FrameSourceError::Transient(err.to_string())
    } else {
        FrameSourceError::Fatal(err.to_string())
    }
}
