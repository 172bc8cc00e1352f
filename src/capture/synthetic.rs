//! Deterministic test-pattern source.
//!
//! Produces a moving gradient without touching any hardware, and can be
//! scripted to misbehave the way real devices do (refuse to open, time out,
//! hand back empty frames).

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use super::error::{CaptureError, Result};
use super::frame::{Frame, PixelFormat};
use super::FrameSource;

/// What the next `capture` call should do instead of drawing the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Empty,
    Timeout,
    Unavailable,
    Resize { width: u32, height: u32 },
}

pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    sequence: u64,
    open: bool,
    refuse_open: bool,
    script: VecDeque<Scripted>,
    opens: u32,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format,
            sequence: 0,
            open: false,
            refuse_open: false,
            script: VecDeque::new(),
            opens: 0,
        }
    }

    /// Make every `open` fail with `DeviceUnavailable`.
    pub fn refusing_open(mut self) -> Self {
        self.refuse_open = true;
        self
    }

    /// Queue behaviours consumed one per `capture` call, ahead of the pattern.
    pub fn with_script(mut self, steps: impl IntoIterator<Item = Scripted>) -> Self {
        self.script.extend(steps);
        self
    }

    /// Number of successful `open` calls so far.
    pub fn open_count(&self) -> u32 {
        self.opens
    }

    fn render(&self) -> Vec<u8> {
        let bpp = self.format.bytes_per_pixel();
        let mut data = vec![0u8; self.width as usize * self.height as usize * bpp];
        let shift = self.sequence as usize;

        for (i, px) in data.chunks_exact_mut(bpp).enumerate() {
            let x = i % self.width as usize;
            let y = i / self.width as usize;
            let (r, g, b) = pattern_pixel(x, y, shift);
            match self.format {
                PixelFormat::Rgb8 => px.copy_from_slice(&[r, g, b]),
                PixelFormat::Bgr8 => px.copy_from_slice(&[b, g, r]),
                PixelFormat::Bgra8 => px.copy_from_slice(&[b, g, r, 0xFF]),
            }
        }
        data
    }
}

/// Gradient pixel at `(x, y)` shifted by the frame counter.
pub fn pattern_pixel(x: usize, y: usize, shift: usize) -> (u8, u8, u8) {
    (
        (x.wrapping_add(shift) & 0xFF) as u8,
        (y.wrapping_add(shift) & 0xFF) as u8,
        ((x ^ y) & 0xFF) as u8,
    )
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        if self.refuse_open {
            return Err(CaptureError::unavailable(format!(
                "{} is configured to refuse open",
                self.name
            )));
        }
        self.open = true;
        self.opens += 1;
        debug!(source = %self.name, "synthetic source opened");
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(CaptureError::NotOpen);
        }

        match self.script.pop_front() {
            Some(Scripted::Empty) => return Ok(Frame::empty(self.format)),
            Some(Scripted::Timeout) => {
                return Err(CaptureError::CaptureTimeout(Duration::from_millis(0)))
            }
            Some(Scripted::Unavailable) => {
                return Err(CaptureError::unavailable("scripted disconnect"))
            }
            Some(Scripted::Resize { width, height }) => {
                self.width = width;
                self.height = height;
            }
            None => {}
        }

        self.sequence += 1;
        let data = self.render();
        Ok(Frame::new(self.width, self.height, self.format, data)?.with_sequence(self.sequence))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_requires_open() {
        let mut src = SyntheticSource::new("s", 2, 2, PixelFormat::Rgb8);
        assert!(matches!(src.capture(), Err(CaptureError::NotOpen)));
    }

    #[test]
    fn pattern_matches_format_layout() {
        let mut rgb = SyntheticSource::new("rgb", 3, 2, PixelFormat::Rgb8);
        let mut bgr = SyntheticSource::new("bgr", 3, 2, PixelFormat::Bgr8);
        rgb.open().unwrap();
        bgr.open().unwrap();

        let a = rgb.capture().unwrap();
        let b = bgr.capture().unwrap();
        for (p, q) in a.data.chunks_exact(3).zip(b.data.chunks_exact(3)) {
            assert_eq!([p[2], p[1], p[0]], [q[0], q[1], q[2]]);
        }
    }

    #[test]
    fn frames_advance_sequence() {
        let mut src = SyntheticSource::new("s", 4, 4, PixelFormat::Bgra8);
        src.open().unwrap();
        let a = src.capture().unwrap();
        let b = src.capture().unwrap();
        assert_eq!(a.meta.sequence + 1, b.meta.sequence);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn script_runs_before_pattern() {
        let mut src = SyntheticSource::new("s", 2, 2, PixelFormat::Rgb8).with_script([
            Scripted::Timeout,
            Scripted::Empty,
            Scripted::Resize {
                width: 4,
                height: 1,
            },
        ]);
        src.open().unwrap();

        assert!(matches!(src.capture(), Err(CaptureError::CaptureTimeout(_))));
        assert!(src.capture().unwrap().is_empty());
        let resized = src.capture().unwrap();
        assert_eq!((resized.width(), resized.height()), (4, 1));
        assert_eq!(src.capture().unwrap().width(), 4);
    }

    #[test]
    fn refusing_source_never_opens() {
        let mut src = SyntheticSource::new("s", 2, 2, PixelFormat::Rgb8).refusing_open();
        assert!(matches!(src.open(), Err(CaptureError::DeviceUnavailable(_))));
        assert!(!src.is_open());
        assert_eq!(src.open_count(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let mut src = SyntheticSource::new("s", 2, 2, PixelFormat::Rgb8);
        src.open().unwrap();
        src.close();
        src.close();
        assert!(!src.is_open());
    }
}
