use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::pipeline::hand_off::{HandOff, Offer};
use crate::pipeline::pipeline_error::PipelineError;
use crate::pipeline::result_sink::ResultSink;
use crate::shared::cancellation::CancellationToken;
use crate::shared::constants::{DEFAULT_POLL_TIMEOUT_MS, DEFAULT_TRANSIENT_RETRIES};
use crate::source::domain::frame_source::{FrameSource, FrameSourceError, SourceRead};

use super::escalate;

/// Settings for the acquisition thread.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionConfig {
    /// Bounded wait for a single read from the source.
    pub poll_timeout: Duration,
    /// Consecutive transient errors tolerated; the next one fails the pipeline.
    pub max_transient_retries: u32,
    /// Pause before retrying after a transient error.
    pub retry_backoff: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            max_transient_retries: DEFAULT_TRANSIENT_RETRIES,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.poll_timeout.is_zero() {
            return Err(PipelineError::Configuration(
                "poll timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Dedicated thread pulling captures from a [`FrameSource`] into the hand-off.
pub struct AcquisitionLoop {
    handle: Option<JoinHandle<Box<dyn FrameSource>>>,
    cancel: CancellationToken,
}

impl AcquisitionLoop {
    pub fn start(
        mut source: Box<dyn FrameSource>,
        hand_off: Arc<HandOff>,
        sink: Arc<dyn ResultSink>,
        config: AcquisitionConfig,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let thread_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("bodyflow-acquisition".into())
            .spawn(move || {
                run(source.as_mut(), &hand_off, sink.as_ref(), &config, &thread_cancel);
                source
            })
            .map_err(|e| PipelineError::Configuration(format!("cannot spawn acquisition thread: {e}")))?;
        Ok(Self {
            handle: Some(handle),
            cancel,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancels and joins the thread, returning the source. Idempotent.
    pub fn stop(&mut self) -> Result<Option<Box<dyn FrameSource>>, PipelineError> {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map(Some)
                .map_err(|_| PipelineError::ThreadPanicked("acquisition")),
            None => Ok(None),
        }
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{e}");
        }
    }
}

fn run(
    source: &mut dyn FrameSource,
    hand_off: &HandOff,
    sink: &dyn ResultSink,
    config: &AcquisitionConfig,
    cancel: &CancellationToken,
) {
    let description = source.description();
    log::info!("Acquisition started: {description}");
    let mut consecutive_transient = 0u32;
    let mut received = 0usize;

    while !cancel.is_cancelled() && hand_off.is_accepting() {
        match source.try_get_next(config.poll_timeout, cancel) {
            Ok(SourceRead::Capture(capture)) => {
                consecutive_transient = 0;
                received += 1;
                if let Offer::Rejected = hand_off.offer(capture) {
                    log::debug!("Capture {received} from {description} was not accepted");
                }
            }
            Ok(SourceRead::Timeout) => {}
            Ok(SourceRead::EndOfStream) => {
                log::info!("{description} exhausted after {received} captures");
                hand_off.close();
                return;
            }
            Err(FrameSourceError::Transient(message)) => {
                consecutive_transient += 1;
                if consecutive_transient > config.max_transient_retries {
                    escalate(
                        hand_off,
                        sink,
                        PipelineError::TransientIo {
                            attempts: consecutive_transient,
                            message,
                        },
                    );
                    return;
                }
                log::warn!(
                    "Transient read error from {description} (attempt {consecutive_transient}): {message}"
                );
                std::thread::sleep(config.retry_backoff);
            }
            Err(FrameSourceError::Fatal(message)) => {
                escalate(hand_off, sink, PipelineError::Source(message));
                return;
            }
        }
    }
    log::info!("Acquisition stopped: {description}");
}
