use std::sync::Arc;
use std::time::Duration;

use crate::shared::calibration::Calibration;
use crate::shared::cancellation::CancellationToken;
use crate::source::domain::frame_source::FrameSource;
use crate::tracking::domain::body_tracker::BodyTracker;
use crate::tracking::domain::tracker_configuration::TrackerConfiguration;

use super::hand_off::HandOff;
use super::infrastructure::acquisition_loop::{AcquisitionConfig, AcquisitionLoop};
use super::infrastructure::tracking_loop::TrackingLoop;
use super::pipeline_error::PipelineError;
use super::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use super::pipeline_state::PipelineState;
use super::result_sink::ResultSink;

/// Settings for a [`BodyTrackingPipeline`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BodyTrackingConfig {
    pub acquisition: AcquisitionConfig,
    pub tracker: TrackerConfiguration,
}

/// Use case: stream captures from a source through body tracking into a sink.
///
/// `new` → `start` → (`wait` | `dispose`). Acquisition and tracking each run
/// on their own thread; the caller only sees state changes and sink
/// callbacks. Dropping the pipeline disposes it.
pub struct BodyTrackingPipeline {
    hand_off: Arc<HandOff>,
    cancel: CancellationToken,
    calibration: Calibration,
    config: BodyTrackingConfig,
    sink: Arc<dyn ResultSink>,
    pending: Option<(Box<dyn FrameSource>, Box<dyn BodyTracker>, Box<dyn PipelineLogger>)>,
    acquisition: Option<AcquisitionLoop>,
    tracking: Option<TrackingLoop>,
}

impl BodyTrackingPipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        tracker: Box<dyn BodyTracker>,
        sink: Arc<dyn ResultSink>,
        config: BodyTrackingConfig,
    ) -> Result<Self, PipelineError> {
        config.acquisition.validate()?;
        config
            .tracker
            .validate()
            .map_err(PipelineError::Configuration)?;
        let calibration = source
            .calibration()
            .map_err(|e| PipelineError::Configuration(format!("source calibration unavailable: {e}")))?;
        if !calibration.depth_mode.has_depth() {
            return Err(PipelineError::Configuration(format!(
                "{} has no usable depth (mode {:?})",
                source.description(),
                calibration.depth_mode
            )));
        }

        Ok(Self {
            hand_off: Arc::new(HandOff::new()),
            cancel: CancellationToken::new(),
            calibration,
            config,
            sink,
            pending: Some((source, tracker, Box::new(NullPipelineLogger))),
            acquisition: None,
            tracking: None,
        })
    }

    /// Replaces the tracking-thread logger. Only effective before `start`.
    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        if let Some((_, _, slot)) = self.pending.as_mut() {
            *slot = logger;
        }
        self
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.hand_off.start()?;
        let Some((source, tracker, logger)) = self.pending.take() else {
            return Err(PipelineError::InvalidState {
                operation: "start",
                state: self.hand_off.state(),
            });
        };

        self.tracking = Some(TrackingLoop::start(
            tracker,
            &self.calibration,
            &self.config.tracker,
            self.hand_off.clone(),
            self.sink.clone(),
            logger,
            self.cancel.clone(),
        )?);
        self.acquisition = Some(AcquisitionLoop::start(
            source,
            self.hand_off.clone(),
            self.sink.clone(),
            self.config.acquisition.clone(),
            self.cancel.clone(),
        )?);
        log::info!("Body tracking pipeline started");
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.hand_off.state()
    }

    /// The first failure, if any.
    pub fn failure(&self) -> Option<PipelineError> {
        self.hand_off.failure()
    }

    /// Blocks until the source is exhausted and its last capture delivered,
    /// or until the pipeline fails.
    pub fn wait(&self) -> Result<(), PipelineError> {
        self.ensure_started("wait")?;
        self.hand_off
            .wait(None)
            .unwrap_or(Err(PipelineError::Disposed))
    }

    /// Like [`BodyTrackingPipeline::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), PipelineError>> {
        if let Err(e) = self.ensure_started("wait") {
            return Some(Err(e));
        }
        self.hand_off.wait(Some(timeout))
    }

    fn ensure_started(&self, operation: &'static str) -> Result<(), PipelineError> {
        match self.hand_off.state() {
            PipelineState::Disposed => Err(PipelineError::Disposed),
            PipelineState::Idle => Err(PipelineError::InvalidState {
                operation,
                state: PipelineState::Idle,
            }),
            PipelineState::Running | PipelineState::Failed => Ok(()),
        }
    }

    /// Stops both threads and releases every capture still held. Idempotent.
    pub fn dispose(&mut self) -> Result<(), PipelineError> {
        let first = self.hand_off.dispose();
        self.cancel.cancel();

        let mut result = Ok(());
        if let Some(mut acquisition) = self.acquisition.take() {
            if let Err(e) = acquisition.stop() {
                result = Err(e);
            }
        }
        if let Some(mut tracking) = self.tracking.take() {
            if let Err(e) = tracking.stop() {
                result = result.and(Err(e));
            }
        }
        self.pending = None;
        if first {
            log::info!("Body tracking pipeline disposed");
        }
        result
    }
}

impl Drop for BodyTrackingPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::error!("{e}");
        }
    }
}
