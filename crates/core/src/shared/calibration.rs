use serde::{Deserialize, Serialize};

/// Depth sensor operating mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    Off,
    Nfov2x2Binned,
    NfovUnbinned,
    Wfov2x2Binned,
    WfovUnbinned,
    PassiveIr,
}

impl DepthMode {
    /// `(width, height)` of the depth image, `(0, 0)` when off.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            DepthMode::Off => (0, 0),
            DepthMode::Nfov2x2Binned => (320, 288),
            DepthMode::NfovUnbinned => (640, 576),
            DepthMode::Wfov2x2Binned => (512, 512),
            DepthMode::WfovUnbinned | DepthMode::PassiveIr => (1024, 1024),
        }
    }

    /// Whether the mode produces depth that body tracking can use.
    pub fn has_depth(self) -> bool {
        !matches!(self, DepthMode::Off | DepthMode::PassiveIr)
    }
}

/// Color camera resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorResolution {
    Off,
    R720p,
    R1080p,
    R1440p,
    R1536p,
    R2160p,
    R3072p,
}

impl ColorResolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ColorResolution::Off => (0, 0),
            ColorResolution::R720p => (1280, 720),
            ColorResolution::R1080p => (1920, 1080),
            ColorResolution::R1440p => (2560, 1440),
            ColorResolution::R1536p => (2048, 1536),
            ColorResolution::R2160p => (3840, 2160),
            ColorResolution::R3072p => (4096, 3072),
        }
    }
}

/// Camera frame rate used at capture time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameRate {
    #[serde(rename = "5")]
    Fps5,
    #[serde(rename = "15")]
    Fps15,
    #[serde(rename = "30")]
    Fps30,
}

impl FrameRate {
    pub fn per_second(self) -> u32 {
        match self {
            FrameRate::Fps5 => 5,
            FrameRate::Fps15 => 15,
            FrameRate::Fps30 => 30,
        }
    }
}

/// Pinhole intrinsics of one camera. Distortion terms are carried for
/// consumers that project joints into images; this crate does not use them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    #[serde(default)]
    pub distortion: Vec<f32>,
}

/// Sensor calibration embedded in a recording or read from a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub depth_mode: DepthMode,
    pub color_resolution: ColorResolution,
    pub depth_camera: CameraCalibration,
    pub color_camera: Option<CameraCalibration>,
    /// Row-major 3x3 rotation followed by translation in mm, depth → color.
    #[serde(default)]
    pub depth_to_color: Option<[f32; 12]>,
}

impl Calibration {
    /// Parses a raw calibration blob (JSON document).
    pub fn from_raw(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn to_raw(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Nominal calibration for a mode, with the principal point centred.
    pub fn nominal(depth_mode: DepthMode, color_resolution: ColorResolution) -> Self {
        let (dw, dh) = depth_mode.dimensions();
        let color_camera = match color_resolution {
            ColorResolution::Off => None,
            res => {
                let (cw, ch) = res.dimensions();
                Some(CameraCalibration::centred(cw, ch))
            }
        };
        Self {
            depth_mode,
            color_resolution,
            depth_camera: CameraCalibration::centred(dw, dh),
            color_camera,
            depth_to_color: None,
        }
    }
}

impl CameraCalibration {
    fn centred(width: u32, height: u32) -> Self {
        let focal = width.max(height) as f32 / 2.0;
        Self {
            width,
            height,
            fx: focal,
            fy: focal,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
            distortion: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::nfov_binned(DepthMode::Nfov2x2Binned, (320, 288))]
    #[case::nfov(DepthMode::NfovUnbinned, (640, 576))]
    #[case::wfov_binned(DepthMode::Wfov2x2Binned, (512, 512))]
    #[case::wfov(DepthMode::WfovUnbinned, (1024, 1024))]
    #[case::off(DepthMode::Off, (0, 0))]
    fn test_depth_mode_dimensions(#[case] mode: DepthMode, #[case] expected: (u32, u32)) {
        assert_eq!(mode.dimensions(), expected);
    }

    #[test]
    fn test_passive_ir_has_no_depth() {
        assert!(!DepthMode::PassiveIr.has_depth());
        assert!(!DepthMode::Off.has_depth());
        assert!(DepthMode::NfovUnbinned.has_depth());
    }

    #[test]
    fn test_raw_round_trip() {
        let calibration = Calibration::nominal(DepthMode::NfovUnbinned, ColorResolution::R720p);
        let raw = calibration.to_raw().unwrap();
        assert_eq!(Calibration::from_raw(&raw).unwrap(), calibration);
    }

    #[test]
    fn test_malformed_raw_is_an_error() {
        assert!(Calibration::from_raw(b"not json").is_err());
    }

    #[test]
    fn test_nominal_without_color() {
        let calibration = Calibration::nominal(DepthMode::Wfov2x2Binned, ColorResolution::Off);
        assert!(calibration.color_camera.is_none());
        assert_eq!(calibration.depth_camera.width, 512);
        assert_eq!(calibration.depth_camera.cx, 256.0);
    }

    #[test]
    fn test_frame_rate_serializes_as_number_string() {
        let json = serde_json::to_string(&FrameRate::Fps30).unwrap();
        assert_eq!(json, "\"30\"");
        assert_eq!(FrameRate::Fps15.per_second(), 15);
    }
}
