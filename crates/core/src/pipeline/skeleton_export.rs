use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

use crate::shared::capture::Capture;
use crate::shared::constants::{EXPORT_BUFFER_CAPACITY, EXPORT_SAMPLE_INTERVAL_MS};
use crate::shared::timestamp::Timestamp;
use crate::tracking::domain::joint::JointType;
use crate::tracking::domain::skeleton::{BodyFrame, Skeleton};

use super::pipeline_error::PipelineError;
use super::result_sink::ResultSink;

pub const DEFAULT_SUBJECT_HEIGHT_CM: u32 = 183;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize skeletons: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportConfig {
    pub directory: PathBuf,
    /// File name and experiment id prefix.
    pub prefix: String,
    pub subject_height_cm: u32,
    /// Minimum device-time spacing between two samples.
    pub sample_interval: Duration,
    /// Samples kept before the oldest are evicted.
    pub capacity: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            prefix: "bodyflow".into(),
            subject_height_cm: DEFAULT_SUBJECT_HEIGHT_CM,
            sample_interval: Duration::from_millis(EXPORT_SAMPLE_INTERVAL_MS),
            capacity: EXPORT_BUFFER_CAPACITY,
        }
    }
}

/// One exported skeleton sample. Positions are metres with x mirrored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkeletonRecord {
    #[serde(rename = "ID_exp")]
    pub experiment_id: String,
    #[serde(rename = "date_exp")]
    pub date: String,
    pub height: u32,
    /// SpineNavel x, metres.
    pub x: f32,
    /// SpineNavel z (distance from the sensor), metres.
    pub y: f32,
    #[serde(rename = "ID_subject")]
    pub subject_id: usize,
    pub time: String,
    pub joints: BTreeMap<String, [f32; 3]>,
    /// `[x, y, z, w]`.
    pub orientations: BTreeMap<String, [f32; 4]>,
}

impl SkeletonRecord {
    fn new(skeleton: &Skeleton, subject_id: usize, config: &ExportConfig, wall: &DateTime<Local>) -> Self {
        let mut joints = BTreeMap::new();
        let mut orientations = BTreeMap::new();
        for (joint_type, joint) in skeleton.iter() {
            let [x, y, z] = joint.position_mm();
            joints.insert(
                joint_type.name().to_string(),
                [-x / 1000.0, y / 1000.0, z / 1000.0],
            );
            let q = joint.orientation();
            orientations.insert(joint_type.name().to_string(), [q.x, q.y, q.z, q.w]);
        }
        let navel = skeleton[JointType::SpineNavel].position_mm();
        let date = wall.format("%Y-%m-%d").to_string();
        Self {
            experiment_id: format!("{}_{date}", config.prefix),
            date,
            height: config.subject_height_cm,
            x: navel[0] / 1000.0,
            y: navel[2] / 1000.0,
            subject_id,
            time: format!(
                "{}.{:04}",
                wall.format("%H:%M:%S"),
                wall.timestamp_subsec_micros() / 100
            ),
            joints,
            orientations,
        }
    }
}

/// Lets any thread ask for the buffered samples to be written out.
#[derive(Clone, Debug, Default)]
pub struct ExportHandle {
    requests: Arc<AtomicUsize>,
}

impl ExportHandle {
    /// Requests made before the next body frame collapse into one export.
    pub fn request_export(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn take_request(&self) -> bool {
        self.requests.swap(0, Ordering::SeqCst) > 0
    }
}

/// Samples skeletons into a bounded rolling buffer and writes them to JSON on
/// request.
pub struct SkeletonExporter {
    config: ExportConfig,
    buffer: VecDeque<SkeletonRecord>,
    last_sample: Option<Timestamp>,
    handle: ExportHandle,
}

impl SkeletonExporter {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            buffer: VecDeque::with_capacity(config.capacity.min(1024)),
            config,
            last_sample: None,
            handle: ExportHandle::default(),
        }
    }

    pub fn handle(&self) -> ExportHandle {
        self.handle.clone()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Samples `frame` if due and writes the buffer if an export was
    /// requested. Returns the written file.
    pub fn observe(&mut self, frame: &BodyFrame) -> Result<Option<PathBuf>, ExportError> {
        self.observe_at(frame, &Local::now())
    }

    fn observe_at(&mut self, frame: &BodyFrame, wall: &DateTime<Local>) -> Result<Option<PathBuf>, ExportError> {
        self.sample(frame, wall);
        if !self.handle.take_request() {
            return Ok(None);
        }
        self.export(wall).map(Some)
    }

    fn sample(&mut self, frame: &BodyFrame, wall: &DateTime<Local>) {
        if frame.body_count() == 0 {
            return;
        }
        let due = self
            .last_sample
            .map_or(true, |last| frame.timestamp().saturating_sub(last) >= self.config.sample_interval);
        if !due {
            return;
        }
        self.last_sample = Some(frame.timestamp());
        for (subject_id, body) in frame.bodies().iter().enumerate() {
            if self.buffer.len() >= self.config.capacity {
                self.buffer.pop_front();
            }
            self.buffer
                .push_back(SkeletonRecord::new(&body.skeleton, subject_id, &self.config, wall));
        }
    }

    /// Writes every buffered sample to a new file and clears the buffer.
    pub fn export(&mut self, wall: &DateTime<Local>) -> Result<PathBuf, ExportError> {
        let path = self.config.directory.join(format!(
            "{}_{}.json",
            self.config.prefix,
            wall.format("%Y-%m-%d_%H-%M")
        ));
        write_records(&path, self.buffer.make_contiguous())?;
        log::info!("Exported {} skeleton samples to {}", self.buffer.len(), path.display());
        self.buffer.clear();
        Ok(path)
    }
}

fn write_records(path: &Path, records: &[SkeletonRecord]) -> Result<(), ExportError> {
    let io_error = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_error)?;
    }
    let mut file = BufWriter::new(File::create(path).map_err(io_error)?);
    serde_json::to_writer(&mut file, records)?;
    file.flush().map_err(io_error)
}

/// [`ResultSink`] decorator feeding body frames to a [`SkeletonExporter`].
///
/// Export failures are logged; they never fail the pipeline.
pub struct ExportingSink<S> {
    inner: S,
    exporter: Mutex<SkeletonExporter>,
    handle: ExportHandle,
    export_on_completion: bool,
}

impl<S: ResultSink> ExportingSink<S> {
    pub fn new(inner: S, exporter: SkeletonExporter) -> Self {
        let handle = exporter.handle();
        Self {
            inner,
            exporter: Mutex::new(exporter),
            handle,
            export_on_completion: false,
        }
    }

    /// Also writes whatever is buffered when the source is exhausted.
    pub fn with_export_on_completion(mut self) -> Self {
        self.export_on_completion = true;
        self
    }

    fn lock_exporter(&self) -> std::sync::MutexGuard<'_, SkeletonExporter> {
        self.exporter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn handle(&self) -> ExportHandle {
        self.handle.clone()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ResultSink> ResultSink for ExportingSink<S> {
    fn on_body_frame(&self, frame: BodyFrame) {
        if let Err(e) = self.lock_exporter().observe(&frame) {
            log::error!("Skeleton export failed: {e}");
        }
        self.inner.on_body_frame(frame);
    }

    fn on_image_frame(&self, capture: Capture) {
        self.inner.on_image_frame(capture);
    }

    fn on_failed(&self, error: &PipelineError) {
        self.inner.on_failed(error);
    }

    fn on_completed(&self) {
        if self.export_on_completion {
            let mut exporter = self.lock_exporter();
            if exporter.buffered() > 0 {
                if let Err(e) = exporter.export(&Local::now()) {
                    log::error!("Skeleton export failed: {e}");
                }
            }
        }
        self.inner.on_completed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::RecordingSink;
    use crate::tracking::domain::joint::{Joint, JointConfidenceLevel, Quaternion};
    use crate::tracking::domain::skeleton::Body;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn wall() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .earliest()
            .unwrap()
    }

    fn frame(ts_ms: u64, bodies: usize) -> BodyFrame {
        let bodies = (0..bodies)
            .map(|i| {
                let mut skeleton = Skeleton::default();
                skeleton[JointType::SpineNavel] = Joint::new(
                    [250.0, -100.0, 2000.0 + i as f32],
                    Quaternion::new(0.5, 0.1, 0.2, 0.3),
                    JointConfidenceLevel::High,
                );
                Body {
                    id: 10 + i as u32,
                    skeleton,
                }
            })
            .collect();
        BodyFrame::new(Timestamp::from_millis(ts_ms), bodies)
    }

    fn exporter(dir: &Path, capacity: usize) -> SkeletonExporter {
        SkeletonExporter::new(ExportConfig {
            directory: dir.to_path_buf(),
            prefix: "Azure".into(),
            capacity,
            ..Default::default()
        })
    }

    #[test]
    fn test_samples_at_most_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = exporter(dir.path(), 100);
        for ts in [0, 100, 199, 200, 350, 400] {
            exporter.observe_at(&frame(ts, 1), &wall()).unwrap();
        }
        // 0, 200, 400
        assert_eq!(exporter.buffered(), 3);
    }

    #[test]
    fn test_one_record_per_body_and_empty_frames_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = exporter(dir.path(), 100);
        exporter.observe_at(&frame(0, 0), &wall()).unwrap();
        exporter.observe_at(&frame(10, 2), &wall()).unwrap();
        assert_eq!(exporter.buffered(), 2);
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = exporter(dir.path(), 3);
        for i in 0..5 {
            exporter.observe_at(&frame(i * 200, 1), &wall()).unwrap();
        }
        assert_eq!(exporter.buffered(), 3);
    }

    #[test]
    fn test_record_layout() {
        let record = SkeletonRecord::new(&frame(0, 1).bodies()[0].skeleton, 0, &ExportConfig::default(), &wall());
        assert_eq!(record.experiment_id, "bodyflow_2024-03-05");
        assert_eq!(record.date, "2024-03-05");
        assert_eq!(record.time, "14:07:09.0000");
        assert_eq!(record.height, 183);
        assert_relative_eq!(record.x, 0.25);
        assert_relative_eq!(record.y, 2.0);
        let navel = record.joints["SpineNavel"];
        assert_relative_eq!(navel[0], -0.25);
        assert_relative_eq!(navel[1], -0.1);
        assert_eq!(record.orientations["SpineNavel"], [0.1, 0.2, 0.3, 0.5]);
        assert_eq!(record.joints.len(), 32);
    }

    #[test]
    fn test_requested_export_writes_file_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = exporter(dir.path(), 100);
        let handle = exporter.handle();
        exporter.observe_at(&frame(0, 1), &wall()).unwrap();
        handle.request_export();
        handle.request_export();

        let written = exporter.observe_at(&frame(500, 1), &wall()).unwrap().unwrap();
        assert_eq!(written, dir.path().join("Azure_2024-03-05_14-07.json"));
        assert_eq!(exporter.buffered(), 0);
        assert_eq!(handle.pending_requests(), 0);

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&written).unwrap()).unwrap();
        let records = json.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["ID_exp"], "Azure_2024-03-05");
        assert_eq!(records[0]["ID_subject"], 0);
        assert!(records[0]["joints"]["Head"].is_array());

        // both requests were served by that single export
        assert!(exporter.observe_at(&frame(900, 1), &wall()).unwrap().is_none());
    }

    #[test]
    fn test_unwritable_directory_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let mut exporter = exporter(&blocker.join("sub"), 10);
        exporter.handle().request_export();
        assert!(matches!(
            exporter.observe_at(&frame(0, 1), &wall()),
            Err(ExportError::Io { .. })
        ));
    }

    #[test]
    fn test_exporting_sink_forwards_everything() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ExportingSink::new(RecordingSink::default(), exporter(dir.path(), 10));
        sink.on_body_frame(frame(0, 1));
        sink.on_failed(&PipelineError::Source("x".into()));
        sink.on_completed();
        assert_eq!(sink.inner().body_timestamps(), vec![0]);
        assert_eq!(sink.inner().failures().len(), 1);
        assert_eq!(sink.inner().completed_count(), 1);

        sink.handle().request_export();
        sink.on_body_frame(frame(300, 1));
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_completion_export_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let plain = ExportingSink::new(RecordingSink::default(), exporter(dir.path(), 10));
        plain.on_body_frame(frame(0, 1));
        plain.on_completed();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let sink = ExportingSink::new(RecordingSink::default(), exporter(dir.path(), 10))
            .with_export_on_completion();
        sink.on_completed();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0, "nothing buffered");
        sink.on_body_frame(frame(0, 1));
        sink.on_completed();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(sink.inner().completed_count(), 2);
    }
}
