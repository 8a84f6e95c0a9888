use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Device timestamp in microseconds.
///
/// Device clocks start near zero when streaming begins, so this is an offset
/// rather than wall-clock time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1000))
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, other: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(other.0))
    }

    /// Applies a signed microsecond offset, clamping at zero.
    pub fn offset(self, delta_us: i64) -> Timestamp {
        if delta_us >= 0 {
            Timestamp(self.0.saturating_add(delta_us as u64))
        } else {
            Timestamp(self.0.saturating_sub(delta_us.unsigned_abs()))
        }
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Timestamp(d.as_micros().min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}
