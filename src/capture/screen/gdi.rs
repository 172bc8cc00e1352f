use std::mem::size_of;

use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, SRCCOPY,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetDesktopWindow, GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
    SM_YVIRTUALSCREEN,
};

use crate::capture::error::{CaptureError, Result};
use crate::capture::frame::{Frame, PixelFormat};

/// GDI keeps no state between grabs; handles are taken and released per call
pub(super) struct Session;

struct VirtualScreen {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

fn virtual_screen() -> VirtualScreen {
    unsafe {
        VirtualScreen {
            x: GetSystemMetrics(SM_XVIRTUALSCREEN),
            y: GetSystemMetrics(SM_YVIRTUALSCREEN),
            width: GetSystemMetrics(SM_CXVIRTUALSCREEN),
            height: GetSystemMetrics(SM_CYVIRTUALSCREEN),
        }
    }
}

impl Session {
    pub(super) fn open() -> Result<Self> {
        let screen = virtual_screen();
        if screen.width <= 0 || screen.height <= 0 {
            return Err(CaptureError::unavailable("no desktop attached"));
        }
        Ok(Self)
    }

    pub(super) fn grab(&mut self) -> Result<Frame> {
        let VirtualScreen {
            x,
            y,
            width,
            height,
        } = virtual_screen();
        if width <= 0 || height <= 0 {
            return Err(CaptureError::unavailable("no desktop attached"));
        }

        // Negative height requests a top-down DIB
        let mut info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                biHeight: -height,
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut data = vec![0u8; width as usize * height as usize * 4];

        let lines = unsafe {
            let desktop = GetDesktopWindow();
            let screen_dc = GetDC(Some(desktop));
            if screen_dc.is_invalid() {
                return Err(CaptureError::unavailable("GetDC failed for the desktop"));
            }
            let mem_dc = CreateCompatibleDC(Some(screen_dc));
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let previous = SelectObject(mem_dc, bitmap.into());

            let blit = BitBlt(mem_dc, 0, 0, width, height, Some(screen_dc), x, y, SRCCOPY);
            // GetDIBits needs the bitmap deselected from every DC
            SelectObject(mem_dc, previous);

            let lines = match blit {
                Ok(()) => GetDIBits(
                    mem_dc,
                    bitmap,
                    0,
                    height as u32,
                    Some(data.as_mut_ptr().cast()),
                    &mut info,
                    DIB_RGB_COLORS,
                ),
                Err(_) => 0,
            };

            let _ = DeleteObject(bitmap.into());
            let _ = DeleteDC(mem_dc);
            ReleaseDC(Some(desktop), screen_dc);

            blit.map_err(CaptureError::backend)?;
            lines
        };

        if lines != height {
            return Err(CaptureError::Backend(format!(
                "GetDIBits copied {lines} of {height} lines"
            )));
        }

        Frame::new(width as u32, height as u32, PixelFormat::Bgra8, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grab_matches_virtual_screen() {
        // Service sessions have no desktop to copy
        let Ok(mut session) = Session::open() else {
            return;
        };
        let screen = virtual_screen();
        // Every line must come back from GetDIBits
        let frame = session.grab().unwrap();
        assert_eq!(
            (frame.width(), frame.height()),
            (screen.width as u32, screen.height as u32)
        );
        assert_eq!(frame.format(), PixelFormat::Bgra8);
    }
}
