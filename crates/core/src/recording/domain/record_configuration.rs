use serde::{Deserialize, Serialize};

use crate::shared::calibration::{ColorResolution, DepthMode, FrameRate};
use crate::shared::capture::ImageFormat;

/// Device settings that were in effect when a recording was captured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordConfiguration {
    pub color_format: ImageFormat,
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub camera_fps: FrameRate,
    pub color_track_enabled: bool,
    pub depth_track_enabled: bool,
    pub ir_track_enabled: bool,
    pub imu_track_enabled: bool,
    /// Color-to-depth delay in microseconds (may be negative).
    #[serde(default)]
    pub depth_delay_off_color_us: i32,
    /// Device timestamp of the first record.
    #[serde(default)]
    pub start_timestamp_offset_us: u64,
}

impl RecordConfiguration {
    /// Configuration for a depth-only recording.
    pub fn depth_only(depth_mode: DepthMode, camera_fps: FrameRate) -> Self {
        Self {
            color_format: ImageFormat::ColorBgra32,
            color_resolution: ColorResolution::Off,
            depth_mode,
            camera_fps,
            color_track_enabled: false,
            depth_track_enabled: true,
            ir_track_enabled: false,
            imu_track_enabled: false,
            depth_delay_off_color_us: 0,
            start_timestamp_offset_us: 0,
        }
    }

    pub fn with_color(mut self, format: ImageFormat, resolution: ColorResolution) -> Self {
        self.color_format = format;
        self.color_resolution = resolution;
        self.color_track_enabled = resolution != ColorResolution::Off;
        self
    }

    pub fn with_imu(mut self) -> Self {
        self.imu_track_enabled = true;
        self
    }
}
