use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::recording::domain::imu_sample::ImuSample;
use crate::shared::capture::Capture;
use crate::shared::timestamp::Timestamp;

use super::container::{self, RecordKind, RecordingHeader};
use super::recording_error::RecordingError;

/// Writes captures and IMU samples into a recording readable by
/// `RecordingReader`.
///
/// Records of each kind must arrive in non-decreasing timestamp order.
pub struct RecordingWriter {
    path: PathBuf,
    file: BufWriter<File>,
    last_capture: Option<Timestamp>,
    last_imu: Option<Timestamp>,
    captures_written: usize,
}

impl RecordingWriter {
    pub fn create(path: &Path, header: &RecordingHeader) -> Result<Self, RecordingError> {
        let file = File::create(path).map_err(|e| io_error(path, e))?;
        let mut file = BufWriter::new(file);
        container::write_preamble(&mut file, header).map_err(|e| io_error(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            last_capture: None,
            last_imu: None,
            captures_written: 0,
        })
    }

    pub fn write_capture(&mut self, capture: &Capture) -> Result<(), RecordingError> {
        let timestamp = capture.timestamp();
        check_order(&mut self.last_capture, timestamp)?;
        let payload = container::encode_capture(capture);
        container::write_record(&mut self.file, RecordKind::Capture, timestamp, &payload)
            .map_err(|e| io_error(&self.path, e))?;
        self.captures_written += 1;
        Ok(())
    }

    pub fn write_imu_sample(&mut self, sample: &ImuSample) -> Result<(), RecordingError> {
        let timestamp = sample.timestamp();
        check_order(&mut self.last_imu, timestamp)?;
        let payload = container::encode_imu(sample);
        container::write_record(&mut self.file, RecordKind::Imu, timestamp, &payload)
            .map_err(|e| io_error(&self.path, e))
    }

    pub fn captures_written(&self) -> usize {
        self.captures_written
    }

    /// Flushes buffered records and closes the file.
    pub fn finish(mut self) -> Result<(), RecordingError> {
        self.file.flush().map_err(|e| io_error(&self.path, e))?;
        self.file
            .get_ref()
            .sync_all()
            .map_err(|e| io_error(&self.path, e))
    }
}

fn check_order(last: &mut Option<Timestamp>, timestamp: Timestamp) -> Result<(), RecordingError> {
    if let Some(prev) = *last {
        if timestamp < prev {
            return Err(RecordingError::OutOfOrder {
                timestamp,
                last: prev,
            });
        }
    }
    *last = Some(timestamp);
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> RecordingError {
    RecordingError::Io {
        path: path.to_path_buf(),
        source,
    }
}
