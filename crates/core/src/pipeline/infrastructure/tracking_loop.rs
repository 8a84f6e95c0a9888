use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::pipeline::hand_off::{HandOff, Offer, Take};
use crate::pipeline::pipeline_error::PipelineError;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::pipeline::result_sink::ResultSink;
use crate::shared::calibration::Calibration;
use crate::shared::cancellation::CancellationToken;
use crate::shared::capture::{Capture, ImageFormat};
use crate::tracking::domain::body_tracker::{BodyTracker, TrackerError};
use crate::tracking::domain::joint_smoother::JointSmoother;
use crate::tracking::domain::tracker_configuration::TrackerConfiguration;

use super::escalate;

/// How long the tracking thread waits for a capture before re-checking
/// cancellation.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Dedicated thread running inference on the latest pending capture.
///
/// At most one capture is inferred on at a time; captures that arrive while
/// it is busy replace each other in the hand-off and only the newest is
/// tracked next.
pub struct TrackingLoop {
    hand_off: Arc<HandOff>,
    handle: Option<JoinHandle<Box<dyn BodyTracker>>>,
    cancel: CancellationToken,
}

impl TrackingLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        tracker: Box<dyn BodyTracker>,
        calibration: &Calibration,
        config: &TrackerConfiguration,
        hand_off: Arc<HandOff>,
        sink: Arc<dyn ResultSink>,
        logger: Box<dyn PipelineLogger>,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Configuration)?;
        if !calibration.depth_mode.has_depth() {
            return Err(PipelineError::Configuration(format!(
                "depth mode {:?} cannot be used for body tracking",
                calibration.depth_mode
            )));
        }

        let worker = Worker {
            tracker,
            smoother: JointSmoother::new(config.smoothing_factor),
            expected_depth: calibration.depth_mode.dimensions(),
            hand_off: hand_off.clone(),
            sink,
            logger,
            cancel: cancel.clone(),
            processed: 0,
        };
        let handle = std::thread::Builder::new()
            .name("bodyflow-tracking".into())
            .spawn(move || worker.run())
            .map_err(|e| PipelineError::Configuration(format!("cannot spawn tracking thread: {e}")))?;

        Ok(Self {
            hand_off,
            handle: Some(handle),
            cancel,
        })
    }

    /// Non-blocking: the capture becomes the pending one, releasing any
    /// capture it supersedes.
    pub fn enqueue(&self, capture: Capture) -> Offer {
        self.hand_off.offer(capture)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancels and joins the thread, returning the tracker. Idempotent.
    pub fn stop(&mut self) -> Result<Option<Box<dyn BodyTracker>>, PipelineError> {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map(Some)
                .map_err(|_| PipelineError::ThreadPanicked("tracking")),
            None => Ok(None),
        }
    }
}

impl Drop for TrackingLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{e}");
        }
    }
}

struct Worker {
    tracker: Box<dyn BodyTracker>,
    smoother: JointSmoother,
    expected_depth: (u32, u32),
    hand_off: Arc<HandOff>,
    sink: Arc<dyn ResultSink>,
    logger: Box<dyn PipelineLogger>,
    cancel: CancellationToken,
    processed: usize,
}

enum Step {
    Continue,
    Stop,
}

impl Worker {
    fn run(mut self) -> Box<dyn BodyTracker> {
        while !self.cancel.is_cancelled() {
            let capture = match self.hand_off.take(IDLE_WAIT) {
                Take::Capture(capture) => capture,
                Take::Idle => continue,
                Take::Closed => {
                    // waiters are released only after the sink has seen completion
                    if self.hand_off.is_drained() {
                        self.logger.info("Body tracking completed");
                        self.logger.summary();
                        self.sink.on_completed();
                        self.hand_off.mark_completed();
                    }
                    break;
                }
            };
            let step = self.process(capture);
            self.hand_off.finish();
            if let Step::Stop = step {
                break;
            }
        }
        self.tracker
    }

    fn process(&mut self, capture: Capture) -> Step {
        let timestamp = capture.timestamp();
        if let Err(reason) = self.check_trackable(&capture) {
            log::warn!("Skipping capture at {timestamp}: {reason}");
            self.logger.metric("skipped", 1.0);
            return Step::Continue;
        }

        let started = Instant::now();
        let result = self.tracker.infer(&capture, &self.cancel);
        self.logger
            .timing("inference", started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(mut frame) => {
                if !self.hand_off.is_delivering() {
                    log::debug!("Discarding result at {timestamp}: pipeline no longer running");
                    return Step::Stop;
                }
                self.smoother.apply(&mut frame);
                self.processed += 1;
                self.logger.metric("bodies", frame.body_count() as f64);
                if self.smoother.factor() > 0.0 {
                    self.logger
                        .metric("smoothed_bodies", self.smoother.tracked_bodies() as f64);
                }
                self.logger
                    .progress(self.processed, self.hand_off.dropped_count());

                let delivered = Instant::now();
                self.sink.on_body_frame(frame);
                self.sink.on_image_frame(capture);
                self.logger
                    .timing("delivery", delivered.elapsed().as_secs_f64() * 1000.0);
                Step::Continue
            }
            Err(TrackerError::IncompatibleFrame(reason)) => {
                log::warn!("Skipping capture at {timestamp}: {reason}");
                self.logger.metric("skipped", 1.0);
                Step::Continue
            }
            Err(TrackerError::Cancelled) => Step::Stop,
            Err(e @ (TrackerError::Inference(_) | TrackerError::Model(_))) => {
                drop(capture);
                escalate(&self.hand_off, self.sink.as_ref(), PipelineError::Inference(e.to_string()));
                Step::Stop
            }
        }
    }

    fn check_trackable(&self, capture: &Capture) -> Result<(), String> {
        let depth = capture
            .depth_image()
            .ok_or_else(|| "no depth image".to_string())?;
        if depth.format() != ImageFormat::Depth16 {
            return Err(format!("depth image has format {:?}", depth.format()));
        }
        let size = (depth.width(), depth.height());
        if size != self.expected_depth {
            return Err(format!(
                "depth image is {}x{}, calibration expects {}x{}",
                size.0, size.1, self.expected_depth.0, self.expected_depth.1
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::hand_off::tests::ReleaseLog;
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use crate::pipeline::pipeline_state::PipelineState;
    use crate::pipeline::tests::{calibration, depth_capture, RecordingSink, SinkEvent, StubTracker};
    use crate::shared::calibration::{ColorResolution, DepthMode};
    use crate::shared::capture::Image;
    use crate::shared::timestamp::Timestamp;
    use crate::tracking::domain::skeleton::BodyFrame;

    struct Harness {
        hand_off: Arc<HandOff>,
        sink: Arc<RecordingSink>,
        tracking: TrackingLoop,
    }

    fn start(tracker: StubTracker, smoothing_factor: f32) -> Harness {
        let hand_off = Arc::new(HandOff::new());
        hand_off.start().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let config = TrackerConfiguration {
            smoothing_factor,
            ..Default::default()
        };
        let tracking = TrackingLoop::start(
            Box::new(tracker),
            &calibration(),
            &config,
            hand_off.clone(),
            sink.clone(),
            Box::new(NullPipelineLogger),
            CancellationToken::new(),
        )
        .unwrap();
        Harness {
            hand_off,
            sink,
            tracking,
        }
    }

    /// Waits until the tracking thread has consumed everything offered so far.
    fn settle(hand_off: &HandOff) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while hand_off.has_pending() || hand_off.in_flight() {
            assert!(Instant::now() < deadline, "tracking thread stalled");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn finish(harness: &Harness) -> Result<(), PipelineError> {
        harness.hand_off.close();
        harness
            .hand_off
            .wait(Some(Duration::from_secs(5)))
            .expect("pipeline did not settle")
    }

    #[test]
    fn test_delivers_body_frame_then_image_frame() {
        let log = ReleaseLog::default();
        let harness = start(StubTracker::new(), 0.0);
        harness.tracking.enqueue(depth_capture(&log, 10));
        finish(&harness).unwrap();

        assert_eq!(
            harness.sink.events(),
            vec![SinkEvent::Body(10, 1), SinkEvent::Image(10), SinkEvent::Completed]
        );
        assert_eq!(log.released(), vec![10]);
    }

    #[test]
    fn test_skips_untrackable_captures() {
        let log = ReleaseLog::default();
        let harness = start(StubTracker::new(), 0.0);
        // wrong size, then no depth, then a good one
        harness.tracking.enqueue(log.capture(1));
        settle(&harness.hand_off);
        let color_only = Capture::new().with_color(Image::new(
            ImageFormat::ColorBgra32,
            1,
            1,
            4,
            Timestamp::from_micros(2),
            vec![0; 4],
        ));
        harness.tracking.enqueue(color_only);
        settle(&harness.hand_off);
        harness.tracking.enqueue(depth_capture(&log, 3));
        finish(&harness).unwrap();

        assert_eq!(harness.sink.body_timestamps(), vec![3]);
        assert!(harness.sink.failures().is_empty());
        assert_eq!(log.released(), vec![1, 3]);
    }

    #[test]
    fn test_incompatible_frame_from_tracker_is_skipped() {
        let log = ReleaseLog::default();
        let harness = start(StubTracker::new().incompatible_at(1), 0.0);
        harness.tracking.enqueue(depth_capture(&log, 1));
        settle(&harness.hand_off);
        harness.tracking.enqueue(depth_capture(&log, 2));
        finish(&harness).unwrap();

        assert_eq!(harness.sink.body_timestamps(), vec![2]);
        assert_eq!(log.released(), vec![1, 2]);
    }

    #[test]
    fn test_inference_error_fails_pipeline_once() {
        let log = ReleaseLog::default();
        let harness = start(StubTracker::new().fail_at(2), 0.0);
        harness.tracking.enqueue(depth_capture(&log, 1));
        settle(&harness.hand_off);
        harness.tracking.enqueue(depth_capture(&log, 2));

        let result = harness.hand_off.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(matches!(result, Err(PipelineError::Inference(_))));
        assert_eq!(harness.hand_off.state(), PipelineState::Failed);
        assert_eq!(harness.sink.failures().len(), 1);
        assert_eq!(harness.sink.body_timestamps(), vec![1]);
        assert_eq!(harness.sink.completed_count(), 0);

        // later captures are refused and released
        assert_eq!(harness.tracking.enqueue(depth_capture(&log, 3)), Offer::Rejected);
        assert_eq!(log.released(), vec![1, 2, 3]);
    }

    #[test]
    fn test_result_discarded_when_pipeline_failed_during_inference() {
        let log = ReleaseLog::default();
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
        let mut harness = start(
            StubTracker::new().announcing(started_tx).gated(gate_rx),
            0.0,
        );
        harness.tracking.enqueue(depth_capture(&log, 1));
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)), Ok(1));

        // the source fails while inference on 1 is still running
        assert!(harness.hand_off.fail(PipelineError::Source("unplugged".into())));
        drop(gate_tx);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !harness.tracking.is_finished() {
            assert!(Instant::now() < deadline, "tracking thread did not stop");
            std::thread::sleep(Duration::from_millis(1));
        }
        harness.tracking.stop().unwrap();

        assert!(harness.sink.events().is_empty());
        assert_eq!(log.released(), vec![1]);
    }

    /// Delegates to a [`RecordingSink`], lingering in `on_completed`.
    struct SlowCompletionSink(RecordingSink);

    impl ResultSink for SlowCompletionSink {
        fn on_body_frame(&self, frame: BodyFrame) {
            self.0.on_body_frame(frame);
        }

        fn on_image_frame(&self, capture: Capture) {
            self.0.on_image_frame(capture);
        }

        fn on_failed(&self, error: &PipelineError) {
            self.0.on_failed(error);
        }

        fn on_completed(&self) {
            std::thread::sleep(Duration::from_millis(50));
            self.0.on_completed();
        }
    }

    #[test]
    fn test_wait_returns_after_sink_saw_completion() {
        let log = ReleaseLog::default();
        let hand_off = Arc::new(HandOff::new());
        hand_off.start().unwrap();
        let sink = Arc::new(SlowCompletionSink(RecordingSink::default()));
        let tracking = TrackingLoop::start(
            Box::new(StubTracker::new()),
            &calibration(),
            &TrackerConfiguration::default(),
            hand_off.clone(),
            sink.clone(),
            Box::new(NullPipelineLogger),
            CancellationToken::new(),
        )
        .unwrap();
        tracking.enqueue(depth_capture(&log, 1));
        hand_off.close();

        assert_eq!(hand_off.wait(Some(Duration::from_secs(5))), Some(Ok(())));
        assert_eq!(sink.0.completed_count(), 1);
        assert_eq!(sink.0.body_timestamps(), vec![1]);
    }

    #[test]
    fn test_smoothing_applied_between_frames() {
        let log = ReleaseLog::default();
        let harness = start(StubTracker::new(), 0.5);
        harness.tracking.enqueue(depth_capture(&log, 100));
        settle(&harness.hand_off);
        harness.tracking.enqueue(depth_capture(&log, 200));
        finish(&harness).unwrap();

        // stub reports the pelvis at x = timestamp
        assert_eq!(harness.sink.pelvis_x(), vec![100.0, 150.0]);
    }

    #[test]
    fn test_stop_is_idempotent_and_returns_tracker() {
        let mut harness = start(StubTracker::new(), 0.0);
        assert!(harness.tracking.stop().unwrap().is_some());
        assert!(harness.tracking.stop().unwrap().is_none());
        assert!(harness.tracking.is_finished());
    }

    #[test]
    fn test_rejects_depthless_calibration() {
        let hand_off = Arc::new(HandOff::new());
        let result = TrackingLoop::start(
            Box::new(StubTracker::new()),
            &Calibration::nominal(DepthMode::PassiveIr, ColorResolution::Off),
            &TrackerConfiguration::default(),
            hand_off,
            Arc::new(RecordingSink::default()),
            Box::new(NullPipelineLogger),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_rejects_invalid_smoothing_factor() {
        let config = TrackerConfiguration {
            smoothing_factor: 2.0,
            ..Default::default()
        };
        let result = TrackingLoop::start(
            Box::new(StubTracker::new()),
            &calibration(),
            &config,
            Arc::new(HandOff::new()),
            Arc::new(RecordingSink::default()),
            Box::new(NullPipelineLogger),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }
}
