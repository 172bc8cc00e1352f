//! Desktop capture of the virtual-screen bounding rectangle.
//!
//! Each call re-reads the screen geometry, so a monitor hot-plug changes the
//! frame size from one cycle to the next.

#[cfg(windows)]
mod gdi;
#[cfg(target_os = "linux")]
mod x11;

use tracing::{debug, info, instrument};

use super::error::{CaptureError, Result};
use super::frame::Frame;
use super::FrameSource;

#[cfg(target_os = "linux")]
use x11::Session;

#[cfg(windows)]
use gdi::Session;

#[cfg(not(any(target_os = "linux", windows)))]
struct Session;

#[cfg(not(any(target_os = "linux", windows)))]
impl Session {
    fn open() -> Result<Self> {
        Err(CaptureError::unavailable(
            "screen capture is not supported on this platform",
        ))
    }

    fn grab(&mut self) -> Result<Frame> {
        Err(CaptureError::NotOpen)
    }
}

pub struct ScreenSource {
    name: String,
    session: Option<Session>,
    sequence: u64,
    last_size: (u32, u32),
}

impl ScreenSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session: None,
            sequence: 0,
            last_size: (0, 0),
        }
    }
}

impl FrameSource for ScreenSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    fn open(&mut self) -> Result<()> {
        if self.session.is_none() {
            self.session = Some(Session::open()?);
            info!("Desktop capture session opened");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(source = %self.name))]
    fn capture(&mut self) -> Result<Frame> {
        let session = self.session.as_mut().ok_or(CaptureError::NotOpen)?;
        let frame = session.grab()?;

        let size = (frame.width(), frame.height());
        if size != self.last_size {
            debug!("Virtual screen is now {}x{}", size.0, size.1);
            self.last_size = size;
        }

        self.sequence += 1;
        Ok(frame.with_sequence(self.sequence))
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            info!("Desktop capture session closed");
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}
