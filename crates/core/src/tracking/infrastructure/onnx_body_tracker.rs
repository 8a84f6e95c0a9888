/// Body tracker running a depth-based pose network through ONNX Runtime.
///
/// Preprocesses the depth image into an upright `[1, 1, H, W]` tensor in
/// metres, runs the session, decodes `[1, B, 32, 8]` joint rows and keeps
/// body ids stable across frames by nearest-pelvis matching. Models with a
/// second output `[1, H, W]` (or `[1, 1, H, W]`) of per-pixel candidate
/// slots also yield a body index map.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::shared::calibration::Calibration;
use crate::shared::cancellation::CancellationToken;
use crate::shared::capture::{Capture, Image, ImageFormat};
use crate::shared::constants::JOINT_COUNT;
use crate::shared::timestamp::Timestamp;
use crate::tracking::domain::body_tracker::{BodyTracker, TrackerError};
use crate::tracking::domain::joint::{Joint, JointConfidenceLevel, JointType, Quaternion};
use crate::tracking::domain::skeleton::{Body, BodyFrame, Skeleton, BODY_INDEX_BACKGROUND};
use crate::tracking::domain::tracker_configuration::{SensorOrientation, TrackerConfiguration};

use super::execution_provider::execution_providers_for;
use super::model_resolver;

/// Mean joint confidence below which a candidate body is discarded.
pub const DEFAULT_PRESENCE_THRESHOLD: f32 = 0.3;

/// Values per joint row: x, y, z, qw, qx, qy, qz, confidence.
const VALUES_PER_JOINT: usize = 8;

/// A body further than this from every previous body gets a new id.
const MAX_MATCH_DISTANCE_MM: f32 = 500.0;

/// How often a running inference checks for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Raw tensors of one session run.
struct RunOutput {
    skeleton_shape: Vec<usize>,
    skeleton_data: Vec<f32>,
    /// Per-pixel candidate slots, upright, row-major.
    slots: Option<(Vec<usize>, Vec<f32>)>,
}

pub struct OnnxBodyTracker {
    session: ort::session::Session,
    depth_dimensions: (u32, u32),
    orientation: SensorOrientation,
    presence_threshold: f32,
    ids: BodyIdAssigner,
}

impl OnnxBodyTracker {
    /// Resolve the configured model and load it.
    pub fn from_configuration(
        config: &TrackerConfiguration,
        calibration: &Calibration,
        bundled_dir: Option<&Path>,
    ) -> Result<Self, TrackerError> {
        let model_path = model_resolver::resolve(
            config.model.file_name(),
            config.model_path.as_deref(),
            bundled_dir,
        )
        .map_err(|e| TrackerError::Model(e.to_string()))?;
        Self::new(&model_path, config, calibration)
    }

    pub fn new(
        model_path: &Path,
        config: &TrackerConfiguration,
        calibration: &Calibration,
    ) -> Result<Self, TrackerError> {
        if !calibration.depth_mode.has_depth() {
            return Err(TrackerError::Model(format!(
                "depth mode {:?} cannot be tracked",
                calibration.depth_mode
            )));
        }
        let session = ort::session::Session::builder()
            .map_err(model_error)?
            .with_execution_providers(execution_providers_for(config.processing_mode))
            .map_err(model_error)?
            .commit_from_file(model_path)
            .map_err(model_error)?;
        log::info!(
            "Loaded body tracking model {} ({:?})",
            model_path.display(),
            config.processing_mode
        );

        Ok(Self {
            session,
            depth_dimensions: calibration.depth_mode.dimensions(),
            orientation: config.sensor_orientation,
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
            ids: BodyIdAssigner::default(),
        })
    }

    pub fn with_presence_threshold(mut self, threshold: f32) -> Self {
        self.presence_threshold = threshold;
        self
    }

    /// Runs the session, terminating it from a watcher thread if `cancel` fires.
    fn run(&mut self, input: ndarray::Array4<f32>, cancel: &CancellationToken) -> Result<RunOutput, TrackerError> {
        let input_value = ort::value::Tensor::from_array(input).map_err(inference_error)?;
        let options = ort::session::RunOptions::new().map_err(inference_error)?;
        let done = AtomicBool::new(false);
        let session = &mut self.session;

        std::thread::scope(|scope| {
            scope.spawn(|| {
                watch_cancellation(cancel, &done, || {
                    if let Err(e) = options.terminate() {
                        log::warn!("Failed to terminate inference: {e}");
                    }
                })
            });

            let result = session
                .run_with_options(ort::inputs![input_value], &options)
                .map_err(|e| run_error(e, cancel))
                .and_then(|outputs| {
                    if outputs.len() == 0 {
                        return Err(TrackerError::Inference("model produced no outputs".into()));
                    }
                    let skeletons = outputs[0].try_extract_array::<f32>().map_err(inference_error)?;
                    let slots = if outputs.len() > 1 {
                        let slots = outputs[1].try_extract_array::<f32>().map_err(inference_error)?;
                        Some((slots.shape().to_vec(), slots.iter().copied().collect()))
                    } else {
                        None
                    };
                    Ok(RunOutput {
                        skeleton_shape: skeletons.shape().to_vec(),
                        skeleton_data: skeletons.iter().copied().collect(),
                        slots,
                    })
                });
            done.store(true, Ordering::SeqCst);
            result
        })
    }
}

impl BodyTracker for OnnxBodyTracker {
    fn infer(&mut self, capture: &Capture, cancel: &CancellationToken) -> Result<BodyFrame, TrackerError> {
        if cancel.is_cancelled() {
            return Err(TrackerError::Cancelled);
        }
        let depth = capture
            .depth_image()
            .ok_or_else(|| TrackerError::IncompatibleFrame("capture has no depth image".into()))?;
        if (depth.width(), depth.height()) != self.depth_dimensions {
            return Err(TrackerError::IncompatibleFrame(format!(
                "depth image is {}x{}, calibration expects {}x{}",
                depth.width(),
                depth.height(),
                self.depth_dimensions.0,
                self.depth_dimensions.1
            )));
        }
        let values = depth
            .depth_values()
            .ok_or_else(|| TrackerError::IncompatibleFrame("depth image is not 16-bit".into()))?;

        let (width, height) = (depth.width() as usize, depth.height() as usize);
        let input = depth_tensor(&values, width, height, self.orientation);
        let output = self.run(input, cancel)?;
        if cancel.is_cancelled() {
            return Err(TrackerError::Cancelled);
        }

        let (candidates, slots) = parse_skeletons(&output.skeleton_shape, &output.skeleton_data, self.presence_threshold)?;
        let map = match &output.slots {
            Some((shape, data)) => Some(body_index_map(
                shape,
                data,
                &slot_indices(candidates, &slots),
                (width, height),
                self.orientation,
                capture.timestamp(),
            )?),
            None => None,
        };
        let skeletons = slots.into_iter().map(|(_, skeleton)| skeleton).collect();
        let frame = BodyFrame::new(capture.timestamp(), self.ids.assign(skeletons));
        Ok(match map {
            Some(map) => frame.with_body_index_map(map),
            None => frame,
        })
    }
}

fn model_error(e: impl std::fmt::Display) -> TrackerError {
    TrackerError::Model(e.to_string())
}

fn inference_error(e: impl std::fmt::Display) -> TrackerError {
    TrackerError::Inference(e.to_string())
}

/// A run that failed after cancellation was terminated on purpose.
fn run_error(e: impl std::fmt::Display, cancel: &CancellationToken) -> TrackerError {
    if cancel.is_cancelled() {
        log::debug!("Inference terminated: {e}");
        TrackerError::Cancelled
    } else {
        inference_error(e)
    }
}

/// Polls `cancel` until `done` is set, calling `terminate` once if it fires first.
fn watch_cancellation(cancel: &CancellationToken, done: &AtomicBool, terminate: impl FnOnce()) {
    while !done.load(Ordering::SeqCst) {
        if cancel.is_cancelled() {
            terminate();
            return;
        }
        std::thread::sleep(CANCEL_POLL_INTERVAL);
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Depth in millimetres → upright `[1, 1, H, W]` tensor in metres.
fn depth_tensor(
    depth_mm: &[u16],
    width: usize,
    height: usize,
    orientation: SensorOrientation,
) -> ndarray::Array4<f32> {
    let (out_w, out_h) = orientation.rotated_dimensions(width, height);
    let mut tensor = ndarray::Array4::<f32>::zeros((1, 1, out_h, out_w));
    for dy in 0..out_h {
        for dx in 0..out_w {
            let (sx, sy) = orientation.source_pixel(dx, dy, width, height);
            if let Some(&mm) = depth_mm.get(sy * width + sx) {
                tensor[[0, 0, dy, dx]] = mm as f32 / 1000.0;
            }
        }
    }
    tensor
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

fn confidence_level(score: f32) -> JointConfidenceLevel {
    if !(score >= 0.2) {
        JointConfidenceLevel::None
    } else if score < 0.5 {
        JointConfidenceLevel::Low
    } else if score < 0.8 {
        JointConfidenceLevel::Medium
    } else {
        JointConfidenceLevel::High
    }
}

/// Decode `[1, B, 32, 8]` rows into skeletons, dropping absent bodies.
///
/// Returns the candidate count `B` and the kept skeletons with their slot.
fn parse_skeletons(
    shape: &[usize],
    data: &[f32],
    presence_threshold: f32,
) -> Result<(usize, Vec<(usize, Skeleton)>), TrackerError> {
    let [1, candidates, JOINT_COUNT, VALUES_PER_JOINT] = *shape else {
        return Err(TrackerError::Inference(format!(
            "unexpected output shape {shape:?}, expected [1, B, {JOINT_COUNT}, {VALUES_PER_JOINT}]"
        )));
    };
    let body_len = JOINT_COUNT * VALUES_PER_JOINT;
    if data.len() < candidates * body_len {
        return Err(TrackerError::Inference(format!(
            "output holds {} values, shape needs {}",
            data.len(),
            candidates * body_len
        )));
    }

    let mut skeletons = Vec::new();
    for (slot, rows) in data.chunks_exact(body_len).take(candidates).enumerate() {
        let mean_confidence = rows
            .chunks_exact(VALUES_PER_JOINT)
            .map(|row| row[7])
            .sum::<f32>()
            / JOINT_COUNT as f32;
        if !(mean_confidence >= presence_threshold) {
            continue;
        }
        let mut skeleton = Skeleton::default();
        for (joint_type, row) in JointType::ALL.into_iter().zip(rows.chunks_exact(VALUES_PER_JOINT)) {
            skeleton[joint_type] = Joint::new(
                [row[0] * 1000.0, row[1] * 1000.0, row[2] * 1000.0],
                Quaternion::new(row[3], row[4], row[5], row[6]),
                confidence_level(row[7]),
            );
        }
        skeletons.push((slot, skeleton));
    }
    Ok((candidates, skeletons))
}

/// Candidate slot → position in the frame's body list, or background.
fn slot_indices(candidates: usize, kept: &[(usize, Skeleton)]) -> Vec<u8> {
    let mut indices = vec![BODY_INDEX_BACKGROUND; candidates];
    for (index, (slot, _)) in kept.iter().enumerate() {
        if let (Some(entry), Ok(index)) = (indices.get_mut(*slot), u8::try_from(index)) {
            if index != BODY_INDEX_BACKGROUND {
                *entry = index;
            }
        }
    }
    indices
}

/// Maps upright per-pixel slots back onto the depth image as a Custom8 map.
fn body_index_map(
    shape: &[usize],
    slots: &[f32],
    slot_indices: &[u8],
    (width, height): (usize, usize),
    orientation: SensorOrientation,
    timestamp: Timestamp,
) -> Result<Image, TrackerError> {
    let (up_w, up_h) = orientation.rotated_dimensions(width, height);
    let dims_ok = match *shape {
        [1, h, w] | [1, 1, h, w] => (w, h) == (up_w, up_h),
        _ => false,
    };
    if !dims_ok || slots.len() < up_w * up_h {
        return Err(TrackerError::Inference(format!(
            "unexpected body index output shape {shape:?}, expected [1, {up_h}, {up_w}]"
        )));
    }

    let mut data = vec![BODY_INDEX_BACKGROUND; width * height];
    for dy in 0..up_h {
        for dx in 0..up_w {
            let slot = slots[dy * up_w + dx];
            if !(slot >= 0.0) {
                continue;
            }
            let Some(&index) = slot_indices.get(slot.round() as usize) else {
                continue;
            };
            let (sx, sy) = orientation.source_pixel(dx, dy, width, height);
            data[sy * width + sx] = index;
        }
    }
    Ok(Image::new(
        ImageFormat::Custom8,
        width as u32,
        height as u32,
        width as u32,
        timestamp,
        data,
    ))
}

/// Greedy nearest-pelvis matching against the previous frame's bodies.
#[derive(Debug)]
struct BodyIdAssigner {
    previous: Vec<(u32, [f32; 3])>,
    next_id: u32,
}

impl Default for BodyIdAssigner {
    fn default() -> Self {
        Self {
            previous: Vec::new(),
            next_id: 1,
        }
    }
}

impl BodyIdAssigner {
    fn assign(&mut self, skeletons: Vec<Skeleton>) -> Vec<Body> {
        let mut unmatched = std::mem::take(&mut self.previous);
        let mut bodies = Vec::with_capacity(skeletons.len());
        for skeleton in skeletons {
            let pelvis = skeleton[JointType::Pelvis].position_mm();
            let nearest = unmatched
                .iter()
                .enumerate()
                .map(|(i, (_, p))| (i, distance(p, &pelvis)))
                .filter(|(_, d)| *d <= MAX_MATCH_DISTANCE_MM)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            let id = match nearest {
                Some((i, _)) => unmatched.swap_remove(i).0,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    id
                }
            };
            self.previous.push((id, pelvis));
            bodies.push(Body { id, skeleton });
        }
        bodies
    }
}

fn distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
