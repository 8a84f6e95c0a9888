use std::path::PathBuf;

use crate::shared::constants::{HEAVY_MODEL_NAME, LITE_MODEL_NAME};

/// Where inference runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessingMode {
    Cpu,
    #[default]
    Gpu,
}

/// Which pose network to load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DnnModel {
    #[default]
    Heavy,
    Lite,
}

impl DnnModel {
    pub fn file_name(self) -> &'static str {
        match self {
            DnnModel::Heavy => HEAVY_MODEL_NAME,
            DnnModel::Lite => LITE_MODEL_NAME,
        }
    }
}

/// How the sensor is mounted relative to upright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SensorOrientation {
    #[default]
    Default,
    Clockwise90,
    CounterClockwise90,
    Flip180,
}

impl SensorOrientation {
    /// Dimensions of a `width` x `height` image after rotating it upright.
    pub fn rotated_dimensions(self, width: usize, height: usize) -> (usize, usize) {
        match self {
            SensorOrientation::Default | SensorOrientation::Flip180 => (width, height),
            SensorOrientation::Clockwise90 | SensorOrientation::CounterClockwise90 => {
                (height, width)
            }
        }
    }

    /// Source pixel `(x, y)` for destination pixel `(dx, dy)` of the upright image.
    pub fn source_pixel(self, dx: usize, dy: usize, width: usize, height: usize) -> (usize, usize) {
        match self {
            SensorOrientation::Default => (dx, dy),
            SensorOrientation::Flip180 => (width - 1 - dx, height - 1 - dy),
            // sensor turned clockwise: rotate the image counter-clockwise
            SensorOrientation::Clockwise90 => (width - 1 - dy, dx),
            SensorOrientation::CounterClockwise90 => (dy, height - 1 - dx),
        }
    }
}

/// Settings for a body tracker instance.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfiguration {
    pub processing_mode: ProcessingMode,
    pub model: DnnModel,
    /// Explicit model file; overrides `model` resolution when set.
    pub model_path: Option<PathBuf>,
    pub sensor_orientation: SensorOrientation,
    /// Weight of the previous pose in `[0, 1]`; 0 disables smoothing.
    pub smoothing_factor: f32,
}

pub const DEFAULT_SMOOTHING_FACTOR: f32 = 0.0;

impl Default for TrackerConfiguration {
    fn default() -> Self {
        Self {
            processing_mode: ProcessingMode::default(),
            model: DnnModel::default(),
            model_path: None,
            sensor_orientation: SensorOrientation::default(),
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
        }
    }
}

impl TrackerConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            return Err(format!(
                "smoothing factor must be in [0, 1], got {}",
                self.smoothing_factor
            ));
        }
        Ok(())
    }
}
