use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::recording::domain::imu_sample::ImuSample;
use crate::recording::domain::record_configuration::RecordConfiguration;
use crate::recording::domain::seek_origin::SeekOrigin;
use crate::shared::calibration::Calibration;
use crate::shared::capture::{Capture, ImageFormat};
use crate::shared::timestamp::Timestamp;

use super::color_conversion;
use super::container::{self, RecordKind, RecordingHeader, RECORD_HEADER_LEN};
use super::recording_error::RecordingError;

#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    timestamp: Timestamp,
    offset: u64,
    len: u32,
}

/// Seekable playback of a recording file.
///
/// Opening scans the record index once; payloads are read lazily. Capture and
/// IMU streams have independent cursors that sit *between* records, so
/// `previous_capture` right after `next_capture` yields the same capture.
/// Dropping the reader closes the file.
#[derive(Debug)]
pub struct RecordingReader {
    path: PathBuf,
    file: BufReader<File>,
    header: RecordingHeader,
    captures: Vec<IndexEntry>,
    imu: Vec<IndexEntry>,
    capture_cursor: usize,
    imu_cursor: usize,
    color_conversion: Option<ImageFormat>,
}

impl RecordingReader {
    pub fn open(path: &Path) -> Result<Self, RecordingError> {
        if !path.exists() {
            return Err(RecordingError::NotFound(path.to_path_buf()));
        }
        let open_error = |reason: String| RecordingError::Open {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| open_error(e.to_string()))?;
        let file_len = file
            .metadata()
            .map_err(|e| open_error(e.to_string()))?
            .len();
        let mut file = BufReader::new(file);
        let (header, mut pos) =
            container::read_preamble(&mut file).map_err(|e| open_error(e.to_string()))?;

        let mut captures = Vec::new();
        let mut imu = Vec::new();
        while let Some(record) =
            container::read_record_header(&mut file).map_err(|e| open_error(e.to_string()))?
        {
            let offset = pos + RECORD_HEADER_LEN;
            let end = offset + record.payload_len as u64;
            if end > file_len {
                return Err(open_error(format!("truncated record at offset {pos}")));
            }
            let index = match record.kind {
                RecordKind::Capture => &mut captures,
                RecordKind::Imu => &mut imu,
            };
            if index
                .last()
                .is_some_and(|prev: &IndexEntry| prev.timestamp > record.timestamp)
            {
                return Err(open_error(format!(
                    "record at offset {pos} goes back in time ({})",
                    record.timestamp
                )));
            }
            index.push(IndexEntry {
                timestamp: record.timestamp,
                offset,
                len: record.payload_len,
            });
            file.seek_relative(record.payload_len as i64)
                .map_err(|e| open_error(e.to_string()))?;
            pos = end;
        }

        log::debug!(
            "Opened {}: {} captures, {} IMU samples",
            path.display(),
            captures.len(),
            imu.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            captures,
            imu,
            capture_cursor: 0,
            imu_cursor: 0,
            color_conversion: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capture_count(&self) -> usize {
        self.captures.len()
    }

    pub fn imu_sample_count(&self) -> usize {
        self.imu.len()
    }

    /// Timestamp of the latest record of any kind, zero for an empty recording.
    pub fn last_timestamp(&self) -> Timestamp {
        let last_capture = self.captures.last().map(|e| e.timestamp);
        let last_imu = self.imu.last().map(|e| e.timestamp);
        last_capture.max(last_imu).unwrap_or_default()
    }

    fn first_timestamp(&self) -> Timestamp {
        let first_capture = self.captures.first().map(|e| e.timestamp);
        let first_imu = self.imu.first().map(|e| e.timestamp);
        match (first_capture, first_imu) {
            (Some(a), Some(b)) => a.min(b),
            (a, b) => a.or(b).unwrap_or_default(),
        }
    }

    pub fn raw_calibration(&self) -> &[u8] {
        &self.header.calibration
    }

    pub fn calibration(&self) -> Result<Calibration, RecordingError> {
        Calibration::from_raw(&self.header.calibration).map_err(|source| {
            RecordingError::Calibration {
                path: self.path.clone(),
                source,
            }
        })
    }

    pub fn record_configuration(&self) -> &RecordConfiguration {
        &self.header.configuration
    }

    /// Looks up a tag by name. Absent tags are `Ok(None)`.
    pub fn tag(&self, name: &str) -> Result<Option<&str>, RecordingError> {
        if !name.is_ascii() {
            return Err(RecordingError::InvalidTagName(name.to_string()));
        }
        Ok(self.header.tags.get(name).map(String::as_str))
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.header.tags
    }

    /// Converts color images to `format` during playback.
    ///
    /// Fails immediately when the recording has no color track or the
    /// conversion is not supported.
    pub fn set_color_conversion(&mut self, format: ImageFormat) -> Result<(), RecordingError> {
        let config = &self.header.configuration;
        if !config.color_track_enabled {
            return Err(RecordingError::UnsupportedConversion {
                target: format,
                source_format: None,
            });
        }
        if !color_conversion::is_supported(config.color_format, format) {
            return Err(RecordingError::UnsupportedConversion {
                target: format,
                source_format: Some(config.color_format),
            });
        }
        self.color_conversion = Some(format);
        Ok(())
    }

    /// Next capture in playback order, `Ok(None)` at the end.
    pub fn next_capture(&mut self) -> Result<Option<Capture>, RecordingError> {
        let Some(entry) = self.captures.get(self.capture_cursor).copied() else {
            return Ok(None);
        };
        let capture = self.read_capture(entry)?;
        self.capture_cursor += 1;
        Ok(Some(capture))
    }

    /// Previous capture, `Ok(None)` at the beginning.
    pub fn previous_capture(&mut self) -> Result<Option<Capture>, RecordingError> {
        if self.capture_cursor == 0 {
            return Ok(None);
        }
        let entry = self.captures[self.capture_cursor - 1];
        let capture = self.read_capture(entry)?;
        self.capture_cursor -= 1;
        Ok(Some(capture))
    }

    pub fn next_imu_sample(&mut self) -> Result<Option<ImuSample>, RecordingError> {
        let Some(entry) = self.imu.get(self.imu_cursor).copied() else {
            return Ok(None);
        };
        let sample = self.read_imu(entry)?;
        self.imu_cursor += 1;
        Ok(Some(sample))
    }

    pub fn previous_imu_sample(&mut self) -> Result<Option<ImuSample>, RecordingError> {
        if self.imu_cursor == 0 {
            return Ok(None);
        }
        let entry = self.imu[self.imu_cursor - 1];
        let sample = self.read_imu(entry)?;
        self.imu_cursor -= 1;
        Ok(Some(sample))
    }

    /// Repositions both cursors at the first record at or after the target.
    ///
    /// Targets before the start clamp to the start. Targets past the last
    /// timestamp, or a positive offset from `End`, return `false` and leave
    /// the cursors where they were. `End` with a zero offset places the
    /// cursors after the final records.
    pub fn seek(&mut self, offset_us: i64, origin: SeekOrigin) -> bool {
        let first = self.first_timestamp();
        let last = self.last_timestamp();

        let target = match origin {
            SeekOrigin::Begin => first.offset(offset_us),
            SeekOrigin::End => {
                if offset_us > 0 {
                    return false;
                }
                if offset_us == 0 {
                    self.capture_cursor = self.captures.len();
                    self.imu_cursor = self.imu.len();
                    return true;
                }
                last.offset(offset_us)
            }
            SeekOrigin::DeviceTime => Timestamp::from_micros(offset_us.max(0) as u64),
        };

        if target > last {
            return false;
        }
        let target = target.max(first);
        self.capture_cursor = self.captures.partition_point(|e| e.timestamp < target);
        self.imu_cursor = self.imu.partition_point(|e| e.timestamp < target);
        true
    }

    fn read_capture(&mut self, entry: IndexEntry) -> Result<Capture, RecordingError> {
        let payload = self.read_payload(entry)?;
        let mut capture =
            container::decode_capture(&payload).map_err(|e| self.corrupt(entry, e))?;
        if let Some(target) = self.color_conversion {
            let converted = match capture.color_image() {
                Some(color) if color.format() != target => Some(color_conversion::to_bgra32(color)?),
                _ => None,
            };
            if converted.is_some() {
                capture.replace_color_image(converted);
            }
        }
        Ok(capture)
    }

    fn read_imu(&mut self, entry: IndexEntry) -> Result<ImuSample, RecordingError> {
        let payload = self.read_payload(entry)?;
        container::decode_imu(&payload).map_err(|e| self.corrupt(entry, e))
    }

    fn read_payload(&mut self, entry: IndexEntry) -> Result<Vec<u8>, RecordingError> {
        let mut payload = vec![0u8; entry.len as usize];
        self.file
            .seek(SeekFrom::Start(entry.offset))
            .and_then(|_| self.file.read_exact(&mut payload))
            .map_err(|source| RecordingError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(payload)
    }

    fn corrupt(&self, entry: IndexEntry, err: io::Error) -> RecordingError {
        RecordingError::Corrupt {
            path: self.path.clone(),
            offset: entry.offset,
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for RecordingReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        write!(f, "Playback \"{name}\"")
    }
}
