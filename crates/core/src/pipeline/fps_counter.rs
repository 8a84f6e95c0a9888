use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: usize = 30;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Measures the delivered frame rate over a sliding window of arrivals.
///
/// The rate is reported rounded to 0.1 and only after the window has filled.
/// [`FpsCounter::register_frame`] says when a displayed value should be
/// refreshed: the rounded rate changed and the debounce interval has passed
/// since the last refresh.
pub struct FpsCounter {
    window: usize,
    debounce: Duration,
    arrivals: VecDeque<Instant>,
    displayed: f64,
    last_notified: Option<Instant>,
}

impl FpsCounter {
    pub fn new(window: usize, debounce: Duration) -> Self {
        let window = window.max(2);
        Self {
            window,
            debounce,
            arrivals: VecDeque::with_capacity(window),
            displayed: 0.0,
            last_notified: None,
        }
    }

    pub fn register_frame(&mut self) -> bool {
        self.register_frame_at(Instant::now())
    }

    pub fn register_frame_at(&mut self, now: Instant) -> bool {
        self.arrivals.push_back(now);
        if self.arrivals.len() > self.window {
            self.arrivals.pop_front();
        }
        let Some(rate) = self.measured() else {
            return false;
        };
        if rate == self.displayed {
            return false;
        }
        let debounced = self
            .last_notified
            .is_some_and(|last| now.saturating_duration_since(last) < self.debounce);
        if debounced {
            return false;
        }
        self.displayed = rate;
        self.last_notified = Some(now);
        true
    }

    fn measured(&self) -> Option<f64> {
        if self.arrivals.len() < self.window {
            return None;
        }
        let (first, last) = (self.arrivals.front()?, self.arrivals.back()?);
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if span <= 0.0 {
            return None;
        }
        let rate = (self.arrivals.len() - 1) as f64 / span;
        Some((rate * 10.0).round() / 10.0)
    }

    /// Last reported rate; 0 until the window first fills.
    pub fn frames_per_second(&self) -> f64 {
        self.displayed
    }

    /// `"29.9"`, or an empty string while no rate is known.
    pub fn format(&self) -> String {
        if self.displayed > f64::EPSILON {
            format!("{:.1}", self.displayed)
        } else {
            String::new()
        }
    }

    pub fn reset(&mut self) {
        self.arrivals.clear();
        self.displayed = 0.0;
        self.last_notified = None;
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Feeds `count` frames `interval` apart starting at `start`; returns the
    /// instants that produced a notification.
    fn feed(counter: &mut FpsCounter, start: Instant, interval: Duration, count: u32) -> Vec<Instant> {
        (0..count)
            .map(|i| start + interval * i)
            .filter(|&t| counter.register_frame_at(t))
            .collect()
    }

    #[test]
    fn test_zero_until_window_fills() {
        let mut counter = FpsCounter::default();
        let notified = feed(&mut counter, Instant::now(), Duration::from_millis(33), 29);
        assert!(notified.is_empty());
        assert_relative_eq!(counter.frames_per_second(), 0.0);
        assert_eq!(counter.format(), "");
    }

    #[test]
    fn test_steady_rate_reported_once() {
        let mut counter = FpsCounter::default();
        let start = Instant::now();
        let notified = feed(&mut counter, start, Duration::from_millis(40), 100);
        assert_eq!(notified.len(), 1);
        assert_relative_eq!(counter.frames_per_second(), 25.0);
        assert_eq!(counter.format(), "25.0");
    }

    #[test]
    fn test_rate_rounded_to_tenth() {
        let mut counter = FpsCounter::new(4, Duration::ZERO);
        let start = Instant::now();
        // 3 intervals over 0.301s → 9.967 fps
        for t in [0, 100, 200, 301] {
            counter.register_frame_at(start + Duration::from_millis(t));
        }
        assert_relative_eq!(counter.frames_per_second(), 10.0);
    }

    #[test]
    fn test_changes_debounced() {
        let mut counter = FpsCounter::new(2, Duration::from_millis(500));
        let start = Instant::now();
        assert!(!counter.register_frame_at(start));
        assert!(counter.register_frame_at(start + Duration::from_millis(100))); // 10 fps
        // 20 fps, but only 50ms after the last notification
        assert!(!counter.register_frame_at(start + Duration::from_millis(150)));
        assert_relative_eq!(counter.frames_per_second(), 10.0);
        // 2 fps, 600ms after the notification
        assert!(counter.register_frame_at(start + Duration::from_millis(650)));
        assert_relative_eq!(counter.frames_per_second(), 2.0);
    }

    #[test]
    fn test_identical_instants_ignored() {
        let mut counter = FpsCounter::new(2, Duration::ZERO);
        let now = Instant::now();
        counter.register_frame_at(now);
        assert!(!counter.register_frame_at(now));
        assert_relative_eq!(counter.frames_per_second(), 0.0);
    }

    #[test]
    fn test_reset_clears_rate() {
        let mut counter = FpsCounter::new(2, Duration::ZERO);
        let start = Instant::now();
        counter.register_frame_at(start);
        counter.register_frame_at(start + Duration::from_millis(50));
        assert_eq!(counter.format(), "20.0");
        counter.reset();
        assert_eq!(counter.format(), "");
    }
}
