use std::fmt;

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::shared::timestamp::Timestamp;

/// Pixel layout of an image inside a capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    ColorMjpg,
    ColorNv12,
    ColorYuy2,
    ColorBgra32,
    Depth16,
    Ir16,
    Custom8,
    Custom16,
    Custom,
}

impl ImageFormat {
    /// Bytes per pixel for packed formats; `None` for compressed or planar ones.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            ImageFormat::ColorBgra32 => Some(4),
            ImageFormat::Depth16 | ImageFormat::Ir16 | ImageFormat::Custom16 => Some(2),
            ImageFormat::ColorYuy2 => Some(2),
            ImageFormat::Custom8 => Some(1),
            ImageFormat::ColorMjpg | ImageFormat::ColorNv12 | ImageFormat::Custom => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ImageFormat::ColorMjpg => 0,
            ImageFormat::ColorNv12 => 1,
            ImageFormat::ColorYuy2 => 2,
            ImageFormat::ColorBgra32 => 3,
            ImageFormat::Depth16 => 4,
            ImageFormat::Ir16 => 5,
            ImageFormat::Custom8 => 6,
            ImageFormat::Custom16 => 7,
            ImageFormat::Custom => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => ImageFormat::ColorMjpg,
            1 => ImageFormat::ColorNv12,
            2 => ImageFormat::ColorYuy2,
            3 => ImageFormat::ColorBgra32,
            4 => ImageFormat::Depth16,
            5 => ImageFormat::Ir16,
            6 => ImageFormat::Custom8,
            7 => ImageFormat::Custom16,
            8 => ImageFormat::Custom,
            _ => return None,
        })
    }
}

/// One image plane of a capture: raw bytes plus layout.
#[derive(Clone, PartialEq)]
pub struct Image {
    format: ImageFormat,
    width: u32,
    height: u32,
    stride: u32,
    timestamp: Timestamp,
    data: Vec<u8>,
}

impl Image {
    pub fn new(
        format: ImageFormat,
        width: u32,
        height: u32,
        stride: u32,
        timestamp: Timestamp,
        data: Vec<u8>,
    ) -> Self {
        if format.bytes_per_pixel().is_some() {
            debug_assert!(
                data.len() >= (stride as usize) * (height as usize),
                "data length must cover stride * height"
            );
        }
        Self {
            format,
            width,
            height,
            stride,
            timestamp,
            data,
        }
    }

    /// Builds a tightly packed Depth16 image from millimetre values.
    pub fn from_depth(width: u32, height: u32, timestamp: Timestamp, depth_mm: &[u16]) -> Self {
        debug_assert_eq!(depth_mm.len(), (width as usize) * (height as usize));
        let data = depth_mm.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(ImageFormat::Depth16, width, height, width * 2, timestamp, data)
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// `(height, width, bytes_per_pixel)` view for tightly packed formats.
    pub fn as_ndarray(&self) -> Option<ArrayView3<'_, u8>> {
        let bpp = self.format.bytes_per_pixel()?;
        if self.stride as usize != self.width as usize * bpp {
            return None;
        }
        let len = self.height as usize * self.stride as usize;
        ArrayView3::from_shape(
            (self.height as usize, self.width as usize, bpp),
            self.data.get(..len)?,
        )
        .ok()
    }

    /// Decodes a Depth16 image into row-major millimetre values.
    pub fn depth_values(&self) -> Option<Vec<u16>> {
        if self.format != ImageFormat::Depth16 {
            return None;
        }
        let row_bytes = self.width as usize * 2;
        let mut values = Vec::with_capacity(self.width as usize * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * self.stride as usize;
            let bytes = self.data.get(start..start + row_bytes)?;
            values.extend(bytes.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])));
        }
        Some(values)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Called exactly once when a capture is released.
pub type ReleaseHook = Box<dyn FnOnce(Timestamp) + Send>;

/// One synchronized unit of sensor data.
///
/// Move-only: whoever holds the value owns it, and dropping it releases the
/// underlying resource through the optional release hook. There is no way to
/// release twice or to touch a capture after it was released.
pub struct Capture {
    depth: Option<Image>,
    color: Option<Image>,
    ir: Option<Image>,
    release: Option<ReleaseHook>,
}

impl Capture {
    pub fn new() -> Self {
        Self {
            depth: None,
            color: None,
            ir: None,
            release: None,
        }
    }

    pub fn with_depth(mut self, image: Image) -> Self {
        self.depth = Some(image);
        self
    }

    pub fn with_color(mut self, image: Image) -> Self {
        self.color = Some(image);
        self
    }

    pub fn with_ir(mut self, image: Image) -> Self {
        self.ir = Some(image);
        self
    }

    /// Attaches the native release for this capture. A previously attached
    /// hook is invoked immediately so nothing leaks.
    pub fn with_release_hook(mut self, hook: impl FnOnce(Timestamp) + Send + 'static) -> Self {
        if let Some(previous) = self.release.replace(Box::new(hook)) {
            previous(self.timestamp());
        }
        self
    }

    pub fn depth_image(&self) -> Option<&Image> {
        self.depth.as_ref()
    }

    pub fn color_image(&self) -> Option<&Image> {
        self.color.as_ref()
    }

    pub fn ir_image(&self) -> Option<&Image> {
        self.ir.as_ref()
    }

    pub fn replace_color_image(&mut self, image: Option<Image>) -> Option<Image> {
        std::mem::replace(&mut self.color, image)
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_none() && self.color.is_none() && self.ir.is_none()
    }

    /// Depth timestamp, falling back to color then IR.
    pub fn timestamp(&self) -> Timestamp {
        self.depth
            .as_ref()
            .or(self.color.as_ref())
            .or(self.ir.as_ref())
            .map(Image::timestamp)
            .unwrap_or_default()
    }

    /// Releases the capture and hands back its images as plain values.
    pub fn into_images(mut self) -> (Option<Image>, Option<Image>, Option<Image>) {
        self.fire_release();
        (self.depth.take(), self.color.take(), self.ir.take())
    }

    fn fire_release(&mut self) {
        if let Some(hook) = self.release.take() {
            hook(self.timestamp());
        }
    }
}

impl Default for Capture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.fire_release();
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("timestamp", &self.timestamp())
            .field("depth", &self.depth)
            .field("color", &self.color)
            .field("ir", &self.ir)
            .finish()
    }
}
