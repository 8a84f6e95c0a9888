use crate::shared::capture::{Image, ImageFormat};

use super::recording_error::RecordingError;

/// Whether `source` color images can be converted to `target` during playback.
///
/// BGRA32 is the only conversion target.
pub fn is_supported(source: ImageFormat, target: ImageFormat) -> bool {
    target == ImageFormat::ColorBgra32
        && matches!(
            source,
            ImageFormat::ColorMjpg
                | ImageFormat::ColorNv12
                | ImageFormat::ColorYuy2
                | ImageFormat::ColorBgra32
        )
}

/// Converts a color image to tightly packed BGRA32.
pub fn to_bgra32(src: &Image) -> Result<Image, RecordingError> {
    let (w, h) = (src.width(), src.height());
    let bgra = match src.format() {
        ImageFormat::ColorBgra32 => return Ok(src.clone()),
        ImageFormat::ColorNv12 => nv12_to_bgra(src.data(), w, h, src.stride())?,
        ImageFormat::ColorYuy2 => yuy2_to_bgra(src.data(), w, h, src.stride())?,
        ImageFormat::ColorMjpg => mjpg_to_bgra(src.data(), w, h)?,
        other => {
            return Err(RecordingError::UnsupportedConversion {
                target: ImageFormat::ColorBgra32,
                source_format: Some(other),
            })
        }
    };
    Ok(Image::new(
        ImageFormat::ColorBgra32,
        w,
        h,
        w * 4,
        src.timestamp(),
        bgra,
    ))
}

/// BT.601 limited-range YUV → BGRA pixel.
fn yuv_to_bgra(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = (y as i32 - 16).max(0) * 298;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    let r = clamp(c + 409 * e);
    let g = clamp(c - 100 * d - 208 * e);
    let b = clamp(c + 516 * d);
    [b, g, r, 255]
}

fn nv12_to_bgra(data: &[u8], w: u32, h: u32, stride: u32) -> Result<Vec<u8>, RecordingError> {
    let (w, h) = (w as usize, h as usize);
    let stride = (stride as usize).max(w);
    let y_len = stride * h;
    let uv_len = stride * h.div_ceil(2);
    if data.len() < y_len + uv_len || w % 2 != 0 {
        return Err(RecordingError::Conversion(format!(
            "NV12 buffer of {} bytes does not fit {w}x{h} (need {})",
            data.len(),
            y_len + uv_len
        )));
    }
    let (y_plane, uv_plane) = data.split_at(y_len);

    let mut out = vec![0u8; w * h * 4];
    for row in 0..h {
        let uv_row = &uv_plane[(row / 2) * stride..];
        for col in 0..w {
            let y = y_plane[row * stride + col];
            let uv = (col / 2) * 2;
            let px = yuv_to_bgra(y, uv_row[uv], uv_row[uv + 1]);
            out[(row * w + col) * 4..][..4].copy_from_slice(&px);
        }
    }
    Ok(out)
}

fn yuy2_to_bgra(data: &[u8], w: u32, h: u32, stride: u32) -> Result<Vec<u8>, RecordingError> {
    let (w, h) = (w as usize, h as usize);
    let stride = (stride as usize).max(w * 2);
    if data.len() < stride * h || w % 2 != 0 {
        return Err(RecordingError::Conversion(format!(
            "YUY2 buffer of {} bytes does not fit {w}x{h}",
            data.len()
        )));
    }

    let mut out = vec![0u8; w * h * 4];
    for row in 0..h {
        let line = &data[row * stride..row * stride + w * 2];
        for (pair, chunk) in line.chunks_exact(4).enumerate() {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            let base = (row * w + pair * 2) * 4;
            out[base..base + 4].copy_from_slice(&yuv_to_bgra(y0, u, v));
            out[base + 4..base + 8].copy_from_slice(&yuv_to_bgra(y1, u, v));
        }
    }
    Ok(out)
}

fn mjpg_to_bgra(data: &[u8], w: u32, h: u32) -> Result<Vec<u8>, RecordingError> {
    let decoded = ::image::load_from_memory_with_format(data, ::image::ImageFormat::Jpeg)
        .map_err(|e| RecordingError::Conversion(format!("MJPG decode failed: {e}")))?
        .to_rgba8();
    if decoded.width() != w || decoded.height() != h {
        return Err(RecordingError::Conversion(format!(
            "MJPG frame is {}x{}, expected {w}x{h}",
            decoded.width(),
            decoded.height()
        )));
    }
    let mut bgra = decoded.into_raw();
    for px in bgra.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    Ok(bgra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::timestamp::Timestamp;
    use rstest::rstest;

    #[rstest]
    #[case::mjpg(ImageFormat::ColorMjpg, true)]
    #[case::nv12(ImageFormat::ColorNv12, true)]
    #[case::yuy2(ImageFormat::ColorYuy2, true)]
    #[case::bgra(ImageFormat::ColorBgra32, true)]
    #[case::depth(ImageFormat::Depth16, false)]
    #[case::custom(ImageFormat::Custom, false)]
    fn test_supported_sources_for_bgra(#[case] source: ImageFormat, #[case] expected: bool) {
        assert_eq!(is_supported(source, ImageFormat::ColorBgra32), expected);
    }

    #[test]
    fn test_only_bgra_is_a_target() {
        assert!(!is_supported(ImageFormat::ColorNv12, ImageFormat::ColorNv12));
        assert!(!is_supported(ImageFormat::ColorBgra32, ImageFormat::ColorMjpg));
    }

    #[test]
    fn test_yuv_black_and_white() {
        assert_eq!(yuv_to_bgra(16, 128, 128), [0, 0, 0, 255]);
        assert_eq!(yuv_to_bgra(235, 128, 128), [255, 255, 255, 255]);
    }

    #[test]
    fn test_nv12_grey_frame() {
        // 2x2 luma + one interleaved UV pair row
        let data = vec![126, 126, 126, 126, 128, 128];
        let image = Image::new(ImageFormat::ColorNv12, 2, 2, 2, Timestamp::ZERO, data);
        let out = to_bgra32(&image).unwrap();
        assert_eq!(out.format(), ImageFormat::ColorBgra32);
        assert_eq!(out.stride(), 8);
        for px in out.data().chunks_exact(4) {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_nv12_short_buffer_is_error() {
        let image = Image::new(ImageFormat::ColorNv12, 2, 2, 2, Timestamp::ZERO, vec![0; 4]);
        assert!(matches!(to_bgra32(&image), Err(RecordingError::Conversion(_))));
    }

    #[test]
    fn test_yuy2_expands_pairs() {
        let data = vec![235, 128, 16, 128];
        let image = Image::new(ImageFormat::ColorYuy2, 2, 1, 4, Timestamp::ZERO, data);
        let out = to_bgra32(&image).unwrap();
        assert_eq!(out.data(), &[255, 255, 255, 255, 0, 0, 0, 255]);
    }

    #[test]
    fn test_bgra_passthrough_keeps_timestamp() {
        let image = Image::new(
            ImageFormat::ColorBgra32,
            1,
            1,
            4,
            Timestamp::from_micros(3),
            vec![1, 2, 3, 4],
        );
        let out = to_bgra32(&image).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn test_mjpg_round_trip_through_jpeg_encoder() {
        let rgb = ::image::RgbImage::from_pixel(4, 4, ::image::Rgb([200, 10, 10]));
        let mut jpeg = Vec::new();
        ::image::DynamicImage::ImageRgb8(rgb)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ::image::ImageFormat::Jpeg)
            .unwrap();
        let image = Image::new(ImageFormat::ColorMjpg, 4, 4, 0, Timestamp::ZERO, jpeg);
        let out = to_bgra32(&image).unwrap();
        let first = &out.data()[..4];
        // red dominates, stored in the third byte of BGRA
        assert!(first[2] > 150 && first[0] < 80);
    }

    #[test]
    fn test_depth_is_not_convertible() {
        let image = Image::from_depth(1, 1, Timestamp::ZERO, &[1]);
        assert!(matches!(
            to_bgra32(&image),
            Err(RecordingError::UnsupportedConversion { .. })
        ));
    }
}
