//! On-disk layout of a recording.
//!
//! ```text
//! "BFRC" | u16 version | u32 header_len | header (JSON)
//! record* = u8 kind | u64 timestamp_us | u32 payload_len | payload
//! ```
//!
//! All integers are little-endian. Capture payloads hold up to three images,
//! IMU payloads a fixed 44-byte sample.
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::recording::domain::imu_sample::ImuSample;
use crate::recording::domain::record_configuration::RecordConfiguration;
use crate::shared::capture::{Capture, Image, ImageFormat};
use crate::shared::timestamp::Timestamp;

pub const MAGIC: &[u8; 4] = b"BFRC";
pub const VERSION: u16 = 1;

/// Size of `kind + timestamp + payload_len`.
pub const RECORD_HEADER_LEN: u64 = 1 + 8 + 4;

const IMU_PAYLOAD_LEN: usize = 4 * 3 + 4 * 3 + 8 + 8 + 4;

/// Upper bound on a single header or payload, guards against garbage lengths.
const MAX_BLOCK_LEN: u32 = 512 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordingHeader {
    pub configuration: RecordConfiguration,
    pub calibration: Vec<u8>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl RecordingHeader {
    pub fn new(configuration: RecordConfiguration, calibration: Vec<u8>) -> Self {
        Self {
            configuration,
            calibration,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Capture,
    Imu,
}

impl RecordKind {
    fn code(self) -> u8 {
        match self {
            RecordKind::Capture => 1,
            RecordKind::Imu => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RecordKind::Capture),
            2 => Some(RecordKind::Imu),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    pub timestamp: Timestamp,
    pub payload_len: u32,
}

/// Slots an image can occupy inside a capture payload.
const SLOT_DEPTH: u8 = 0;
const SLOT_COLOR: u8 = 1;
const SLOT_IR: u8 = 2;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

pub fn write_preamble(w: &mut impl Write, header: &RecordingHeader) -> io::Result<()> {
    let json = serde_json::to_vec(header).map_err(|e| invalid(e.to_string()))?;
    let len = u32::try_from(json.len()).map_err(|_| invalid("header too large"))?;
    w.write_all(MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&json)
}

/// Reads magic, version and header; returns the header and its encoded size.
pub fn read_preamble(r: &mut impl Read) -> io::Result<(RecordingHeader, u64)> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(invalid("not a recording (bad magic)"));
    }
    let mut version = [0u8; 2];
    r.read_exact(&mut version)?;
    let version = u16::from_le_bytes(version);
    if version != VERSION {
        return Err(invalid(format!("unsupported container version {version}")));
    }
    let mut len = [0u8; 4];
    r.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len);
    if len > MAX_BLOCK_LEN {
        return Err(invalid(format!("header length {len} out of range")));
    }
    let mut json = vec![0u8; len as usize];
    r.read_exact(&mut json)?;
    let header = serde_json::from_slice(&json).map_err(|e| invalid(e.to_string()))?;
    Ok((header, 4 + 2 + 4 + len as u64))
}

pub fn write_record(
    w: &mut impl Write,
    kind: RecordKind,
    timestamp: Timestamp,
    payload: &[u8],
) -> io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| invalid("payload too large"))?;
    w.write_all(&[kind.code()])?;
    w.write_all(&timestamp.as_micros().to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)
}

/// Reads the next record header, `Ok(None)` at a clean end of file.
pub fn read_record_header(r: &mut impl Read) -> io::Result<Option<RecordHeader>> {
    let mut kind = [0u8; 1];
    if r.read(&mut kind)? == 0 {
        return Ok(None);
    }
    let mut rest = [0u8; 12];
    r.read_exact(&mut rest)?;
    let kind = RecordKind::from_code(kind[0])
        .ok_or_else(|| invalid(format!("unknown record kind {}", kind[0])))?;
    let mut cursor = ByteCursor::new(&rest);
    let timestamp = Timestamp::from_micros(cursor.u64()?);
    let payload_len = cursor.u32()?;
    if payload_len > MAX_BLOCK_LEN {
        return Err(invalid(format!("payload length {payload_len} out of range")));
    }
    Ok(Some(RecordHeader {
        kind,
        timestamp,
        payload_len,
    }))
}

pub fn encode_capture(capture: &Capture) -> Vec<u8> {
    let images: Vec<(u8, &Image)> = [
        (SLOT_DEPTH, capture.depth_image()),
        (SLOT_COLOR, capture.color_image()),
        (SLOT_IR, capture.ir_image()),
    ]
    .into_iter()
    .filter_map(|(slot, image)| image.map(|i| (slot, i)))
    .collect();

    let mut out = vec![images.len() as u8];
    for (slot, image) in images {
        out.push(slot);
        out.push(image.format().code());
        out.extend_from_slice(&image.width().to_le_bytes());
        out.extend_from_slice(&image.height().to_le_bytes());
        out.extend_from_slice(&image.stride().to_le_bytes());
        out.extend_from_slice(&image.timestamp().as_micros().to_le_bytes());
        out.extend_from_slice(&(image.data().len() as u32).to_le_bytes());
        out.extend_from_slice(image.data());
    }
    out
}

pub fn decode_capture(payload: &[u8]) -> io::Result<Capture> {
    let mut cursor = ByteCursor::new(payload);
    let count = cursor.u8()?;
    let mut capture = Capture::new();
    for _ in 0..count {
        let slot = cursor.u8()?;
        let format_code = cursor.u8()?;
        let format = ImageFormat::from_code(format_code)
            .ok_or_else(|| invalid(format!("unknown image format {format_code}")))?;
        let width = cursor.u32()?;
        let height = cursor.u32()?;
        let stride = cursor.u32()?;
        let timestamp = Timestamp::from_micros(cursor.u64()?);
        let len = cursor.u32()? as usize;
        let data = cursor.bytes(len)?.to_vec();
        if format.bytes_per_pixel().is_some() && data.len() < stride as usize * height as usize {
            return Err(invalid("image data shorter than stride * height"));
        }
        let image = Image::new(format, width, height, stride, timestamp, data);
        capture = match slot {
            SLOT_DEPTH => capture.with_depth(image),
            SLOT_COLOR => capture.with_color(image),
            SLOT_IR => capture.with_ir(image),
            other => return Err(invalid(format!("unknown image slot {other}"))),
        };
    }
    Ok(capture)
}

pub fn encode_imu(sample: &ImuSample) -> Vec<u8> {
    let mut out = Vec::with_capacity(IMU_PAYLOAD_LEN);
    for v in sample.acc_sample.iter().chain(sample.gyro_sample.iter()) {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&sample.acc_timestamp.as_micros().to_le_bytes());
    out.extend_from_slice(&sample.gyro_timestamp.as_micros().to_le_bytes());
    out.extend_from_slice(&sample.temperature_c.to_le_bytes());
    out
}

pub fn decode_imu(payload: &[u8]) -> io::Result<ImuSample> {
    if payload.len() != IMU_PAYLOAD_LEN {
        return Err(invalid(format!(
            "IMU payload must be {IMU_PAYLOAD_LEN} bytes, got {}",
            payload.len()
        )));
    }
    let mut cursor = ByteCursor::new(payload);
    let acc_sample = [cursor.f32()?, cursor.f32()?, cursor.f32()?];
    let gyro_sample = [cursor.f32()?, cursor.f32()?, cursor.f32()?];
    let acc_timestamp = Timestamp::from_micros(cursor.u64()?);
    let gyro_timestamp = Timestamp::from_micros(cursor.u64()?);
    let temperature_c = cursor.f32()?;
    Ok(ImuSample {
        temperature_c,
        acc_sample,
        acc_timestamp,
        gyro_sample,
        gyro_timestamp,
    })
}

struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> io::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| invalid("payload truncated"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> io::Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> io::Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}
