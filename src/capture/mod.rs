//! Frame producers: desktop, camera and synthetic sources behind one trait.

pub mod decoder;
pub mod error;
pub mod frame;
pub mod screen;
pub mod synthetic;
pub mod v4l2;

pub use error::CaptureError;
pub use frame::Frame;
pub use frame::PixelFormat;
pub use screen::ScreenSource;
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Source;

/// A producer of raw pixel frames.
///
/// The session (open device, cached display connection) lives inside the
/// implementor and is owned by it exclusively: `open` acquires it once,
/// `capture` reuses it every cycle, `close` releases it.
pub trait FrameSource: Send {
    /// Short human-readable name used in logs and metrics.
    fn name(&self) -> &str;

    /// Acquire the underlying device. Fails with
    /// [`CaptureError::DeviceUnavailable`] when the device does not exist or
    /// access is denied; must never block indefinitely.
    fn open(&mut self) -> error::Result<()>;

    /// Retrieve the next frame. Waits are bounded: a stalled device yields
    /// [`CaptureError::CaptureTimeout`].
    fn capture(&mut self) -> error::Result<Frame>;

    /// Release the device. Calling it on a closed source is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self) -> error::Result<()> {
        (**self).open()
    }

    fn capture(&mut self) -> error::Result<Frame> {
        (**self).capture()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_object_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn FrameSource>>();
    }

    #[test]
    fn boxed_source_forwards_calls() {
        let mut source: Box<dyn FrameSource> =
            Box::new(SyntheticSource::new("boxed", 4, 2, PixelFormat::Rgb8));
        assert!(!source.is_open());
        source.open().unwrap();
        let frame = source.capture().unwrap();
        assert_eq!(frame.width(), 4);
        source.close();
        assert!(!source.is_open());
    }
}
