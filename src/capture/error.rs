use std::time::Duration;

use thiserror::Error;

/// Capture subsystem errors.
///
/// Only failures while opening a source are fatal to it; everything
/// returned from a capture call is per-cycle and the caller retries on the
/// next cycle.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no frame delivered within {0:?}")]
    CaptureTimeout(Duration),

    #[error("capture session is not open")]
    NotOpen,

    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("capture backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable(reason.into())
    }

    pub fn backend(reason: impl std::fmt::Display) -> Self {
        Self::Backend(reason.to_string())
    }

    /// Map an I/O error from a device read, folding timeouts and vanished
    /// devices into their dedicated variants.
    pub fn from_device_io(err: std::io::Error, wait: Duration) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::CaptureTimeout(wait),
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::BrokenPipe => {
                Self::DeviceUnavailable(err.to_string())
            }
            // ENODEV after an unplug
            _ if err.raw_os_error() == Some(19) => Self::DeviceUnavailable(err.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CaptureError>;
