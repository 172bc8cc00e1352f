use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::error::CaptureError;

/// One captured image with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable pixel data, tightly packed rows - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// When the source produced the frame, for capture-to-present latency
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel layouts a frame can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgr8,
    Bgra8,
    Rgb8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Bgra8 => 4,
        }
    }
}

impl Frame {
    /// Wrap a tightly packed pixel buffer, rejecting buffers whose length does
    /// not match `width * height * bytes_per_pixel`.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, CaptureError> {
        let data = data.into();
        let expected = frame_len(width, height, format);
        if data.len() != expected {
            return Err(CaptureError::Malformed {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence: 0,
                width,
                height,
                format,
            }),
            timestamp: Instant::now(),
        })
    }

    /// A zero-size frame, what a device hands back when it has nothing to show
    pub fn empty(format: PixelFormat) -> Self {
        Self {
            data: Bytes::new(),
            meta: Arc::new(FrameMetadata {
                sequence: 0,
                width: 0,
                height: 0,
                format,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        Arc::make_mut(&mut self.meta).sequence = sequence;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.meta.width == 0 || self.meta.height == 0
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Byte length of a tightly packed frame
pub fn frame_len(width: u32, height: u32, format: PixelFormat) -> usize {
    width as usize * height as usize * format.bytes_per_pixel()
}
