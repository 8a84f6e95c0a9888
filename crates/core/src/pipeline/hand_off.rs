use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::shared::capture::Capture;
use crate::shared::timestamp::Timestamp;

use super::pipeline_error::PipelineError;
use super::pipeline_state::PipelineState;

/// Outcome of [`HandOff::offer`]. Displaced or refused captures have
/// already been released when this is returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Accepted; the previously pending capture was dropped.
    Replaced(Timestamp),
    /// Refused: closed, failed, or not newer than the last accepted capture.
    Rejected,
}

/// Outcome of [`HandOff::take`].
#[derive(Debug)]
pub enum Take {
    Capture(Capture),
    /// Nothing arrived within the wait.
    Idle,
    /// Drained, failed or disposed. No capture will follow.
    Closed,
}

#[derive(Default)]
struct Slot {
    pending: Option<Capture>,
    in_flight: bool,
    closed: bool,
    completed: bool,
    state: PipelineState,
    failure: Option<PipelineError>,
    last_accepted: Option<Timestamp>,
    dropped: u64,
}

impl Slot {
    fn is_shut(&self) -> bool {
        self.failure.is_some() || self.state.is_terminal()
    }
}

/// Single-slot, latest-wins hand-off between acquisition and tracking,
/// plus the shared pipeline state.
///
/// One mutex guards everything; it is never held while a capture is
/// released, inferred on, or delivered.
#[derive(Default)]
pub struct HandOff {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl HandOff {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // poisoning only follows a panic inside this module's critical sections
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn offer(&self, capture: Capture) -> Offer {
        let timestamp = capture.timestamp();
        let mut slot = self.lock();
        let stale = slot.last_accepted.is_some_and(|last| timestamp <= last);
        if slot.closed || slot.is_shut() || stale {
            slot.dropped += 1;
            drop(slot);
            log::debug!("Rejected capture at {timestamp}");
            drop(capture);
            return Offer::Rejected;
        }

        slot.last_accepted = Some(timestamp);
        let replaced = slot.pending.replace(capture);
        if replaced.is_some() {
            slot.dropped += 1;
        }
        drop(slot);
        self.changed.notify_all();

        match replaced {
            Some(old) => {
                let old_timestamp = old.timestamp();
                drop(old);
                log::debug!("Dropped capture at {old_timestamp}, superseded by {timestamp}");
                Offer::Replaced(old_timestamp)
            }
            None => Offer::Accepted,
        }
    }

    /// Takes the pending capture, waiting up to `timeout`, and marks it in
    /// flight until [`HandOff::finish`].
    pub fn take(&self, timeout: Duration) -> Take {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.is_shut() {
                return Take::Closed;
            }
            if let Some(capture) = slot.pending.take() {
                slot.in_flight = true;
                return Take::Capture(capture);
            }
            if slot.closed {
                return Take::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Take::Idle;
            }
            slot = self
                .changed
                .wait_timeout(slot, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    pub fn finish(&self) {
        self.lock().in_flight = false;
        self.changed.notify_all();
    }

    /// No more captures will be offered. Whatever is pending is still delivered.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    /// Records the first failure. Returns `false` if one was already recorded
    /// or the pipeline is disposed.
    pub fn fail(&self, error: PipelineError) -> bool {
        let mut slot = self.lock();
        if slot.is_shut() {
            return false;
        }
        slot.failure = Some(error);
        slot.state = PipelineState::Failed;
        let pending = slot.pending.take();
        drop(slot);
        self.changed.notify_all();
        drop(pending);
        true
    }

    /// Whether the stream ended normally: closed, nothing pending, and
    /// neither failed nor disposed nor already completed.
    pub fn is_drained(&self) -> bool {
        let slot = self.lock();
        !slot.completed && !slot.is_shut() && slot.closed && slot.pending.is_none()
    }

    /// Marks normal completion and wakes waiters. Returns `true` the first
    /// time it succeeds; `false` once failed or disposed.
    pub fn mark_completed(&self) -> bool {
        let mut slot = self.lock();
        if slot.completed || slot.is_shut() {
            return false;
        }
        slot.completed = true;
        drop(slot);
        self.changed.notify_all();
        true
    }

    pub fn start(&self) -> Result<(), PipelineError> {
        self.transition("start", PipelineState::Running)
    }

    /// Enters the terminal state and releases any pending capture. Returns
    /// `false` if already disposed.
    pub fn dispose(&self) -> bool {
        let mut slot = self.lock();
        if slot.state.is_terminal() {
            return false;
        }
        slot.state = PipelineState::Disposed;
        slot.closed = true;
        let pending = slot.pending.take();
        drop(slot);
        self.changed.notify_all();
        drop(pending);
        true
    }

    fn transition(&self, operation: &'static str, next: PipelineState) -> Result<(), PipelineError> {
        let mut slot = self.lock();
        if slot.state.is_terminal() {
            return Err(PipelineError::Disposed);
        }
        if !slot.state.can_transition_to(next) {
            return Err(PipelineError::InvalidState {
                operation,
                state: slot.state,
            });
        }
        slot.state = next;
        Ok(())
    }

    /// Blocks until the stream completed, failed, or the pipeline was disposed.
    ///
    /// Returns `None` if `timeout` elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Result<(), PipelineError>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.lock();
        loop {
            if let Some(error) = &slot.failure {
                return Some(Err(error.clone()));
            }
            if slot.state.is_terminal() {
                return Some(Err(PipelineError::Disposed));
            }
            if slot.completed {
                return Some(Ok(()));
            }
            slot = match deadline {
                None => self
                    .changed
                    .wait(slot)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.changed
                        .wait_timeout(slot, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
            };
        }
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn failure(&self) -> Option<PipelineError> {
        self.lock().failure.clone()
    }

    /// Whether results may still reach the sink: neither failed nor disposed.
    pub fn is_delivering(&self) -> bool {
        !self.lock().is_shut()
    }

    pub fn in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn is_accepting(&self) -> bool {
        let slot = self.lock();
        !slot.closed && !slot.is_shut()
    }

    /// Captures rejected or superseded so far.
    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::shared::capture::Image;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Records the timestamp of every released capture.
    #[derive(Clone, Default)]
    pub(crate) struct ReleaseLog(pub(crate) Arc<StdMutex<Vec<u64>>>);

    impl ReleaseLog {
        pub(crate) fn capture(&self, ts: u64) -> Capture {
            let log = self.0.clone();
            Capture::new()
                .with_depth(Image::from_depth(1, 1, Timestamp::from_micros(ts), &[0]))
                .with_release_hook(move |t| log.lock().unwrap().push(t.as_micros()))
        }

        pub(crate) fn released(&self) -> Vec<u64> {
            let mut released = self.0.lock().unwrap().clone();
            released.sort_unstable();
            released
        }
    }

    fn running() -> HandOff {
        let hand_off = HandOff::new();
        hand_off.start().unwrap();
        assert!(hand_off.is_delivering());
        hand_off
    }

    fn take_ts(hand_off: &HandOff) -> Option<u64> {
        match hand_off.take(Duration::ZERO) {
            Take::Capture(c) => Some(c.timestamp().as_micros()),
            _ => None,
        }
    }

    #[test]
    fn test_latest_offer_wins_and_replaced_is_released() {
        let log = ReleaseLog::default();
        let hand_off = running();
        assert_eq!(hand_off.offer(log.capture(1)), Offer::Accepted);
        assert_eq!(
            hand_off.offer(log.capture(2)),
            Offer::Replaced(Timestamp::from_micros(1))
        );
        assert_eq!(log.released(), vec![1]);
        assert_eq!(take_ts(&hand_off), Some(2));
        assert_eq!(log.released(), vec![1, 2]);
        assert_eq!(hand_off.dropped_count(), 1);
    }

    #[test]
    fn test_non_increasing_timestamps_rejected() {
        let log = ReleaseLog::default();
        let hand_off = running();
        hand_off.offer(log.capture(5));
        assert_eq!(hand_off.offer(log.capture(5)), Offer::Rejected);
        assert_eq!(hand_off.offer(log.capture(3)), Offer::Rejected);
        assert_eq!(log.released(), vec![3, 5]);
        assert_eq!(take_ts(&hand_off), Some(5));
    }

    #[test]
    fn test_take_marks_in_flight_until_finish() {
        let log = ReleaseLog::default();
        let hand_off = running();
        hand_off.offer(log.capture(1));
        let taken = hand_off.take(Duration::ZERO);
        assert!(hand_off.in_flight());
        drop(taken);
        hand_off.finish();
        assert!(!hand_off.in_flight());
    }

    #[test]
    fn test_take_times_out_when_empty() {
        let hand_off = running();
        let start = Instant::now();
        assert!(matches!(hand_off.take(Duration::from_millis(20)), Take::Idle));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_close_delivers_pending_then_closed() {
        let log = ReleaseLog::default();
        let hand_off = running();
        hand_off.offer(log.capture(1));
        hand_off.close();
        assert_eq!(hand_off.offer(log.capture(2)), Offer::Rejected);
        assert!(!hand_off.is_drained());
        assert_eq!(take_ts(&hand_off), Some(1));
        hand_off.finish();
        assert!(matches!(hand_off.take(Duration::ZERO), Take::Closed));
        assert!(hand_off.is_drained());
        // drained alone does not release waiters
        assert_eq!(hand_off.wait(Some(Duration::ZERO)), None);
        assert!(hand_off.mark_completed());
        assert!(!hand_off.mark_completed());
        assert!(!hand_off.is_drained());
        assert_eq!(hand_off.wait(Some(Duration::ZERO)), Some(Ok(())));
    }

    #[test]
    fn test_first_failure_wins_and_releases_pending() {
        let log = ReleaseLog::default();
        let hand_off = running();
        hand_off.offer(log.capture(1));
        assert!(hand_off.fail(PipelineError::Source("first".into())));
        assert!(!hand_off.fail(PipelineError::Source("second".into())));
        assert_eq!(log.released(), vec![1]);
        assert_eq!(hand_off.state(), PipelineState::Failed);
        assert_eq!(hand_off.failure(), Some(PipelineError::Source("first".into())));
        assert!(matches!(hand_off.take(Duration::ZERO), Take::Closed));
        assert_eq!(hand_off.offer(log.capture(2)), Offer::Rejected);
        assert!(!hand_off.is_delivering());
        assert!(!hand_off.mark_completed());
    }

    #[test]
    fn test_dispose_is_terminal_and_idempotent() {
        let log = ReleaseLog::default();
        let hand_off = running();
        hand_off.offer(log.capture(1));
        assert!(hand_off.dispose());
        assert!(!hand_off.dispose());
        assert_eq!(log.released(), vec![1]);
        assert_eq!(hand_off.start(), Err(PipelineError::Disposed));
        assert!(!hand_off.fail(PipelineError::Source("late".into())));
        assert!(!hand_off.is_delivering());
        assert_eq!(hand_off.wait(None), Some(Err(PipelineError::Disposed)));
    }

    #[test]
    fn test_start_twice_is_invalid_state() {
        let hand_off = running();
        assert_eq!(
            hand_off.start(),
            Err(PipelineError::InvalidState {
                operation: "start",
                state: PipelineState::Running
            })
        );
    }

    #[test]
    fn test_take_wakes_on_offer() {
        let log = ReleaseLog::default();
        let hand_off = Arc::new(running());
        let consumer = {
            let hand_off = hand_off.clone();
            std::thread::spawn(move || match hand_off.take(Duration::from_secs(5)) {
                Take::Capture(c) => c.timestamp().as_micros(),
                _ => 0,
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        hand_off.offer(log.capture(7));
        assert_eq!(consumer.join().unwrap(), 7);
    }

    #[test]
    fn test_wait_times_out_while_running() {
        let hand_off = running();
        assert_eq!(hand_off.wait(Some(Duration::from_millis(10))), None);
    }
}
