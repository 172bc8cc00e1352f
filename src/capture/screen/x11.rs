use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat, Window};
use x11rb::rust_connection::RustConnection;

use crate::capture::error::{CaptureError, Result};
use crate::capture::frame::{Frame, PixelFormat};

/// Cached X11 connection and root window
pub(super) struct Session {
    conn: RustConnection,
    root: Window,
}

impl Session {
    pub(super) fn open() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)
            .map_err(|e| CaptureError::unavailable(format!("X11 server: {e}")))?;
        let root = conn.setup().roots[screen_num].root;
        Ok(Self { conn, root })
    }

    /// Copy the whole root window, which spans every monitor
    pub(super) fn grab(&mut self) -> Result<Frame> {
        let geometry = self
            .conn
            .get_geometry(self.root)
            .map_err(lost)?
            .reply()
            .map_err(CaptureError::backend)?;

        let (width, height) = (geometry.width, geometry.height);
        let image = self
            .conn
            .get_image(ImageFormat::Z_PIXMAP, self.root, 0, 0, width, height, !0)
            .map_err(lost)?
            .reply()
            .map_err(CaptureError::backend)?;

        // 24/32-bit visuals come back as little-endian BGRX
        if image.data.len() != width as usize * height as usize * 4 {
            return Err(CaptureError::Backend(format!(
                "unsupported root visual (depth {}, {} bytes for {}x{})",
                image.depth,
                image.data.len(),
                width,
                height
            )));
        }

        Frame::new(u32::from(width), u32::from(height), PixelFormat::Bgra8, image.data)
    }
}

fn lost(e: x11rb::errors::ConnectionError) -> CaptureError {
    CaptureError::unavailable(format!("X11 connection lost: {e}"))
}
