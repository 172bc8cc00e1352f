use serde::{Deserialize, Serialize};
use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use super::error::{CaptureError, Result};
use super::frame::{Frame, PixelFormat};

/// Wire formats a camera may stream in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    Mjpeg,
    Yuyv,
    Rgb24,
    Bgr24,
}

impl StreamFormat {
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            StreamFormat::Mjpeg => *b"MJPG",
            StreamFormat::Yuyv => *b"YUYV",
            StreamFormat::Rgb24 => *b"RGB3",
            StreamFormat::Bgr24 => *b"BGR3",
        }
    }

    pub fn from_fourcc(repr: [u8; 4]) -> Option<Self> {
        match &repr {
            b"MJPG" => Some(StreamFormat::Mjpeg),
            b"YUYV" => Some(StreamFormat::Yuyv),
            b"RGB3" => Some(StreamFormat::Rgb24),
            b"BGR3" => Some(StreamFormat::Bgr24),
            _ => None,
        }
    }
}

/// Turn one buffer from the camera into a displayable frame.
///
/// `width`/`height` are the negotiated stream dimensions; MJPEG frames use the
/// dimensions found in the JPEG header instead.
pub fn decode_frame(data: &[u8], format: StreamFormat, width: u32, height: u32) -> Result<Frame> {
    match format {
        StreamFormat::Mjpeg => {
            let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGB);
            let mut decoder = JpegDecoder::new_with_options(data, options);
            let pixels = decoder
                .decode()
                .map_err(|e| CaptureError::Decode(format!("{e:?}")))?;
            let (w, h) = decoder
                .dimensions()
                .ok_or_else(|| CaptureError::Decode("JPEG without dimensions".into()))?;
            Frame::new(w as u32, h as u32, PixelFormat::Rgb8, pixels)
        }
        StreamFormat::Yuyv => {
            let rgb = yuyv_to_rgb(data, width, height)?;
            Frame::new(width, height, PixelFormat::Rgb8, rgb)
        }
        StreamFormat::Rgb24 => packed(data, width, height, PixelFormat::Rgb8),
        StreamFormat::Bgr24 => packed(data, width, height, PixelFormat::Bgr8),
    }
}

fn packed(data: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Frame> {
    let len = super::frame::frame_len(width, height, format);
    if data.len() < len {
        return Err(CaptureError::Malformed {
            expected: len,
            actual: data.len(),
        });
    }
    Frame::new(width, height, format, data[..len].to_vec())
}

/// YUYV 4:2:2 to packed RGB8, BT.601 limited range
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    let needed = pixels * 2;
    if width % 2 != 0 || data.len() < needed {
        return Err(CaptureError::Malformed {
            expected: needed,
            actual: data.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in data[..needed].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
