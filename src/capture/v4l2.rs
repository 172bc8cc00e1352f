//! V4L2 camera capture with memory-mapped buffers and a bounded wait

#[cfg(target_os = "linux")]
use std::path::Path;
#[cfg(target_os = "linux")]
use std::time::Duration;

use tracing::{info, instrument};
#[cfg(target_os = "linux")]
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
use v4l::{
    buffer::Type, capability::Flags as CapFlags, io::traits::CaptureStream,
    prelude::MmapStream, video::capture::Parameters, video::Capture, Device, FourCC,
};

#[cfg(target_os = "linux")]
use super::decoder::{decode_frame, StreamFormat};
use super::error::{CaptureError, Result};
use super::frame::Frame;
#[cfg(target_os = "linux")]
use super::frame::PixelFormat;
use super::FrameSource;
#[cfg(target_os = "linux")]
use crate::utils;
use crate::CameraConfig;

/// Camera source reading `/dev/video{index}`
pub struct V4l2Source {
    name: String,
    config: CameraConfig,
    #[cfg(target_os = "linux")]
    session: Option<Session>,
    #[cfg(target_os = "linux")]
    sequence: u64,
}

#[cfg(target_os = "linux")]
struct Session {
    _device: Device,
    stream: MmapStream<'static>,
    width: u32,
    height: u32,
    format: StreamFormat,
    wait: Duration,
}

impl V4l2Source {
    pub fn new(name: impl Into<String>, config: CameraConfig) -> Self {
        Self {
            name: name.into(),
            config,
            #[cfg(target_os = "linux")]
            session: None,
            #[cfg(target_os = "linux")]
            sequence: 0,
        }
    }

    pub fn device_path(&self) -> String {
        format!("/dev/video{}", self.config.device_index)
    }
}

#[cfg(target_os = "linux")]
impl V4l2Source {
    fn open_session(&self) -> Result<Session> {
        let path = self.device_path();

        // Never hand a nonexistent node to the driver; fail fast instead
        if !Path::new(&path).exists() {
            return Err(CaptureError::unavailable(format!("{path} does not exist")));
        }

        let device = Device::with_path(&path)
            .map_err(|e| CaptureError::unavailable(format!("{path}: {e}")))?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::unavailable(format!("{path}: {e}")))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::unavailable(format!(
                "{path} doesn't support video capture"
            )));
        }

        let offered = utils::decodable_formats(&device);
        let requested = utils::choose_format(&offered, self.config.format).ok_or_else(|| {
            CaptureError::unavailable(format!("{path} offers no decodable stream format"))
        })?;
        if requested != self.config.format {
            warn!(
                "{path} does not offer {:?}, using {requested:?}",
                self.config.format
            );
        }

        let mut fmt = device.format()?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = FourCC::new(&requested.fourcc());
        // The driver may adjust any of these; trust what it reports back
        let fmt = device.set_format(&fmt)?;

        let format = StreamFormat::from_fourcc(fmt.fourcc.repr).ok_or_else(|| {
            CaptureError::unavailable(format!("{path}: unsupported stream format {}", fmt.fourcc))
        })?;

        if let Err(e) = device.set_params(&Parameters::with_fps(self.config.fps)) {
            warn!("{path}: could not request {} fps: {e}", self.config.fps);
        }

        let wait = Duration::from_millis(self.config.timeout_ms);
        let mut stream =
            MmapStream::with_buffers(&device, Type::VideoCapture, self.config.buffer_count)?;
        stream.set_timeout(wait);

        info!(
            "Capture stream ready: {}x{} {:?} with {} buffers",
            fmt.width, fmt.height, format, self.config.buffer_count
        );

        Ok(Session {
            _device: device,
            stream,
            width: fmt.width,
            height: fmt.height,
            format,
            wait,
        })
    }
}

#[cfg(target_os = "linux")]
impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        info!("Opening V4L2 camera {}", self.device_path());
        self.session = Some(self.open_session()?);
        Ok(())
    }

    #[instrument(skip(self), fields(source = %self.name))]
    fn capture(&mut self) -> Result<Frame> {
        let session = self.session.as_mut().ok_or(CaptureError::NotOpen)?;
        let Session {
            stream,
            width,
            height,
            format,
            wait,
            ..
        } = session;

        // Poll-bounded dequeue; a stalled driver surfaces as a timeout
        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::from_device_io(e, *wait))?;

        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        if used == 0 {
            debug!("driver delivered an empty buffer");
            return Ok(Frame::empty(PixelFormat::Rgb8));
        }

        let frame = decode_frame(&buf[..used], *format, *width, *height)?;

        self.sequence += 1;
        Ok(frame.with_sequence(self.sequence))
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            info!("Closed V4L2 camera {}", self.device_path());
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(not(target_os = "linux"))]
impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    fn open(&mut self) -> Result<()> {
        info!("V4L2 camera {} requested on a non-Linux host", self.device_path());
        Err(CaptureError::unavailable("V4L2 capture requires Linux"))
    }

    fn capture(&mut self) -> Result<Frame> {
        Err(CaptureError::NotOpen)
    }

    fn close(&mut self) {}

    fn is_open(&self) -> bool {
        false
    }
}
