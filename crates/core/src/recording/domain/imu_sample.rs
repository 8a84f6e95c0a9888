use serde::{Deserialize, Serialize};

use crate::shared::timestamp::Timestamp;

/// One accelerometer + gyroscope reading.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub temperature_c: f32,
    /// Metres per second squared.
    pub acc_sample: [f32; 3],
    pub acc_timestamp: Timestamp,
    /// Radians per second.
    pub gyro_sample: [f32; 3],
    pub gyro_timestamp: Timestamp,
}

impl ImuSample {
    /// Samples are ordered by accelerometer time.
    pub fn timestamp(&self) -> Timestamp {
        self.acc_timestamp
    }
}
