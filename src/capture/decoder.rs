use jpeg_decoder::Decoder;

use super::frame::{Frame, PixelFormat};
use crate::error::DecodeError;

/// Packed RGB24 pixels of a decoded frame.
#[derive(Debug, Clone)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub fn decode_frame(frame: &Frame) -> Result<RgbImage, DecodeError> {
    // MJPEG carries its own dimensions; trust the decoder over metadata
    if frame.meta.format == PixelFormat::Mjpeg {
        return decode_jpeg(&frame.data);
    }

    let (width, height) = (frame.meta.width, frame.meta.height);
    let pixels = decode_pixels(&frame.data, frame.meta.format, width, height)?;
    Ok(RgbImage {
        width,
        height,
        pixels,
    })
}

pub fn decode_pixels(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, DecodeError> {
    let pixel_count = width as usize * height as usize;
    match format {
        PixelFormat::Mjpeg => decode_jpeg(data).map(|image| image.pixels),
        PixelFormat::Rgb24 => {
            // Already in RGB format
            check_len(data, pixel_count * 3)?;
            Ok(data[..pixel_count * 3].to_vec())
        }
        PixelFormat::Bgr24 => {
            check_len(data, pixel_count * 3)?;
            Ok(data[..pixel_count * 3]
                .chunks_exact(3)
                .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
                .collect())
        }
        PixelFormat::Yuyv4 => {
            check_len(data, pixel_count * 2)?;
            let mut rgb = Vec::with_capacity(pixel_count * 3);
            for chunk in data[..pixel_count * 2].chunks_exact(4) {
                let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
                rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
                rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
            Ok(rgb)
        }
    }
}

fn decode_jpeg(data: &[u8]) -> Result<RgbImage, DecodeError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder.info().ok_or(DecodeError::MissingJpegHeader)?;

    let pixels = match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => pixels,
        jpeg_decoder::PixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        other => return Err(DecodeError::JpegLayout(other)),
    };

    Ok(RgbImage {
        width: info.width as u32,
        height: info.height as u32,
        pixels,
    })
}

fn check_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

// BT.601 limited range, fixed point
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swizzled() {
        let out = decode_pixels(&[1, 2, 3, 4, 5, 6], PixelFormat::Bgr24, 2, 1).unwrap();
        assert_eq!(out, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn yuyv_black_and_white() {
        // Two pixels per macropixel: black then white, neutral chroma
        let out = decode_pixels(&[16, 128, 235, 128], PixelFormat::Yuyv4, 2, 1).unwrap();
        assert_eq!(&out[..3], &[0, 0, 0]);
        assert_eq!(&out[3..], &[255, 255, 255]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = decode_pixels(&[0; 5], PixelFormat::Rgb24, 2, 1).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { expected: 6, actual: 5 }));
    }
}
