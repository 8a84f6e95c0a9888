use std::path::PathBuf;

use thiserror::Error;

use crate::shared::capture::ImageFormat;
use crate::shared::timestamp::Timestamp;

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("cannot find file \"{0}\"")]
    NotFound(PathBuf),
    #[error("cannot open file \"{path}\" for playback: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("error during reading from file \"{path}\": {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record at offset {offset} in \"{path}\": {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },
    #[error("invalid calibration in \"{path}\": {source}")]
    Calibration {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("tag name can contain only ASCII symbols: {0:?}")]
    InvalidTagName(String),
    #[error("format {target:?} is not supported for color conversion from {source_format:?}")]
    UnsupportedConversion {
        target: ImageFormat,
        source_format: Option<ImageFormat>,
    },
    #[error("color conversion failed: {0}")]
    Conversion(String),
    #[error("timestamp {timestamp} goes backwards (last written {last})")]
    OutOfOrder { timestamp: Timestamp, last: Timestamp },
    #[error("failed to encode recording header: {0}")]
    Header(#[source] serde_json::Error),
}

impl RecordingError {
    /// I/O failures may clear up on retry; everything else is structural.
    pub fn is_transient(&self) -> bool {
        matches!(self, RecordingError::Io { .. })
    }
}
