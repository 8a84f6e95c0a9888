/// Model file names for the two tracker network sizes.
pub const HEAVY_MODEL_NAME: &str = "body_tracking_heavy.onnx";
pub const LITE_MODEL_NAME: &str = "body_tracking_lite.onnx";

/// Number of joints in the skeleton topology.
pub const JOINT_COUNT: usize = 32;

/// Consecutive transient acquisition errors tolerated before failing.
pub const DEFAULT_TRANSIENT_RETRIES: u32 = 2;

/// Bounded wait for a single `try_get_next` call.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Minimum spacing between two exported skeleton samples.
pub const EXPORT_SAMPLE_INTERVAL_MS: u64 = 200;

/// Maximum number of skeleton samples held before the oldest are evicted.
pub const EXPORT_BUFFER_CAPACITY: usize = 3000;
