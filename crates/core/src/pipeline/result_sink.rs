use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};

use crate::shared::capture::Capture;
use crate::tracking::domain::skeleton::BodyFrame;

use super::pipeline_error::PipelineError;

/// Consumer of pipeline results.
///
/// Called from the pipeline's worker threads. Implementations must not block
/// for long; the tracking thread does not take the next capture until the
/// callbacks return.
pub trait ResultSink: Send + Sync {
    fn on_body_frame(&self, frame: BodyFrame);

    /// The capture the preceding body frame was computed from. Dropping it
    /// releases it.
    fn on_image_frame(&self, capture: Capture);

    /// Reported once, for the first failure only.
    fn on_failed(&self, error: &PipelineError);

    /// The source was exhausted and every accepted capture was delivered.
    fn on_completed(&self) {}
}

/// Everything a [`ResultSink`] can observe, as a value.
#[derive(Debug)]
pub enum PipelineEvent {
    BodyFrame(BodyFrame),
    ImageFrame(Capture),
    Failed(PipelineError),
    Completed,
}

/// Forwards results over a channel so they can be consumed on another thread.
///
/// A bounded sink drops frame events when the channel is full rather than
/// stalling the tracking thread. Failure and completion are never dropped for
/// lack of room: they wait up to [`CONTROL_SEND_TIMEOUT`] for the consumer.
pub struct ChannelSink {
    tx: Sender<PipelineEvent>,
    bounded: bool,
}

/// Longest wait for room in a full channel when reporting failure or completion.
pub const CONTROL_SEND_TIMEOUT: Duration = Duration::from_secs(5);

impl ChannelSink {
    pub fn unbounded() -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx, bounded: false }, rx)
    }

    pub fn bounded(capacity: usize) -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx, bounded: true }, rx)
    }

    fn send(&self, event: PipelineEvent) {
        if !self.bounded {
            // only fails once the receiver is gone
            let _ = self.tx.send(event);
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => match event {
                PipelineEvent::BodyFrame(_) | PipelineEvent::ImageFrame(_) => {
                    log::debug!("Result channel full, dropping {}", event_name(&event));
                }
                PipelineEvent::Failed(_) | PipelineEvent::Completed => {
                    if let Err(SendTimeoutError::Timeout(event)) =
                        self.tx.send_timeout(event, CONTROL_SEND_TIMEOUT)
                    {
                        log::warn!("Result consumer stalled, {} not delivered", event_name(&event));
                    }
                }
            },
        }
    }
}

fn event_name(event: &PipelineEvent) -> &'static str {
    match event {
        PipelineEvent::BodyFrame(_) => "body frame",
        PipelineEvent::ImageFrame(_) => "image frame",
        PipelineEvent::Failed(_) => "failure",
        PipelineEvent::Completed => "completion",
    }
}

impl ResultSink for ChannelSink {
    fn on_body_frame(&self, frame: BodyFrame) {
        self.send(PipelineEvent::BodyFrame(frame));
    }

    fn on_image_frame(&self, capture: Capture) {
        self.send(PipelineEvent::ImageFrame(capture));
    }

    fn on_failed(&self, error: &PipelineError) {
        self.send(PipelineEvent::Failed(error.clone()));
    }

    fn on_completed(&self) {
        self.send(PipelineEvent::Completed);
    }
}
