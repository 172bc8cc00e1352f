//! Capture on a dedicated thread feeding a bounded frame queue.
//!
//! The worker owns the wrapped source for as long as it runs. Completion of
//! `open` and per-frame failures travel back as [`CaptureEvent`]s on their own
//! channel, so the draw thread only ever waits with a deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::capture::error::{CaptureError, Result};
use crate::capture::{Frame, FrameSource};

/// Backoff after a failed capture so a dead device doesn't spin the worker
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Notifications from the worker thread
#[derive(Debug)]
pub enum CaptureEvent {
    Opened,
    OpenFailed(CaptureError),
    CaptureFailed(CaptureError),
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub queue_depth: usize,
    pub open_timeout: Duration,
    pub frame_timeout: Duration,
    pub pin_core: Option<usize>,
    /// Upper bound on capture rate, 0 for as fast as the source delivers
    pub max_fps: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            queue_depth: 2,
            open_timeout: Duration::from_secs(5),
            frame_timeout: Duration::from_millis(500),
            pin_core: None,
            max_fps: 30,
        }
    }
}

struct Running {
    frames: Receiver<Frame>,
    events: Receiver<CaptureEvent>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Box<dyn FrameSource>>,
}

/// Any [`FrameSource`] moved onto its own thread
pub struct ThreadedSource {
    name: String,
    idle: Option<Box<dyn FrameSource>>,
    running: Option<Running>,
    options: WorkerOptions,
}

impl ThreadedSource {
    pub fn new(inner: Box<dyn FrameSource>, options: WorkerOptions) -> Self {
        Self {
            name: inner.name().to_owned(),
            idle: Some(inner),
            running: None,
            options,
        }
    }

    fn spawn(&mut self, mut source: Box<dyn FrameSource>) -> Result<Running> {
        let (frame_tx, frames) = flume::bounded(self.options.queue_depth.max(1));
        let (event_tx, events) = flume::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let worker_stop = stop.clone();
        let overflow = frames.clone();
        let pin_core = self.options.pin_core;
        let interval = match self.options.max_fps {
            0 => Duration::ZERO,
            fps => Duration::from_secs(1) / fps,
        };
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(format!("capture-{name}"))
            .spawn(move || {
                if let Some(id) = pin_core {
                    if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                        warn!("Could not pin capture worker {name} to core {id}");
                    }
                }

                if let Err(e) = source.open() {
                    let _ = event_tx.send(CaptureEvent::OpenFailed(e));
                    return source;
                }
                let _ = event_tx.send(CaptureEvent::Opened);

                let channels = WorkerChannels {
                    frames: frame_tx,
                    overflow,
                    events: event_tx.clone(),
                };
                run_worker(&name, source.as_mut(), &channels, &worker_stop, interval);

                source.close();
                let _ = event_tx.send(CaptureEvent::Closed);
                source
            })?;

        Ok(Running {
            frames,
            events,
            stop,
            handle,
        })
    }

    /// Stop the worker and take the source back if the thread has exited.
    fn shutdown(&mut self, running: Running) {
        running.stop.store(true, Ordering::Relaxed);
        // The worker keeps its own frame receiver for drop-oldest, so only the
        // stop flag ends its loop; dropping ours just discards queued frames
        drop(running.frames);
        drop(running.events);

        // A source may be inside its own bounded wait; give it that long to notice
        let deadline = Instant::now() + self.options.frame_timeout;
        while !running.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        if !running.handle.is_finished() {
            warn!("Capture worker {} is blocked in the device, detaching it", self.name);
            return;
        }
        match running.handle.join() {
            Ok(source) => self.idle = Some(source),
            Err(_) => error!("Capture worker {} panicked", self.name),
        }
    }
}

struct WorkerChannels {
    frames: Sender<Frame>,
    overflow: Receiver<Frame>,
    events: Sender<CaptureEvent>,
}

fn run_worker(
    name: &str,
    source: &mut dyn FrameSource,
    channels: &WorkerChannels,
    stop: &AtomicBool,
    interval: Duration,
) {
    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();

        match source.capture() {
            Ok(mut frame) => loop {
                match channels.frames.try_send(frame) {
                    Ok(()) => break,
                    Err(TrySendError::Full(f)) => {
                        // Drop the oldest queued frame, keep the newest
                        let _ = channels.overflow.try_recv();
                        metrics::counter!("frames_dropped_total", "slot" => name.to_owned())
                            .increment(1);
                        frame = f;
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            },
            Err(CaptureError::NotOpen) => return,
            Err(e) => {
                if channels.events.send(CaptureEvent::CaptureFailed(e)).is_err() {
                    return;
                }
                thread::sleep(ERROR_BACKOFF);
            }
        }

        let elapsed = started.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

impl FrameSource for ThreadedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let source = self.idle.take().ok_or_else(|| {
            CaptureError::unavailable(format!("{} was lost to a blocked worker", self.name))
        })?;

        let running = self.spawn(source)?;
        match running.events.recv_timeout(self.options.open_timeout) {
            Ok(CaptureEvent::Opened) => {
                info!("Capture worker for {} started", self.name);
                self.running = Some(running);
                Ok(())
            }
            Ok(CaptureEvent::OpenFailed(e)) => {
                self.shutdown(running);
                Err(e)
            }
            Ok(other) => {
                self.shutdown(running);
                Err(CaptureError::backend(format!("unexpected worker event {other:?}")))
            }
            Err(_) => {
                self.shutdown(running);
                Err(CaptureError::unavailable(format!(
                    "{} did not open within {:?}",
                    self.name, self.options.open_timeout
                )))
            }
        }
    }

    fn capture(&mut self) -> Result<Frame> {
        let running = self.running.as_ref().ok_or(CaptureError::NotOpen)?;

        let mut failure = None;
        let mut closed = false;
        for event in running.events.try_iter() {
            match event {
                CaptureEvent::CaptureFailed(e) => failure = Some(e),
                CaptureEvent::Closed => closed = true,
                other => debug!("Ignoring worker event {other:?}"),
            }
        }

        // A frame queued after a failure supersedes it
        if let Some(frame) = running.frames.try_iter().last() {
            return Ok(frame);
        }
        if closed {
            return Err(CaptureError::unavailable("capture worker stopped"));
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let mut frame = match running.frames.recv_timeout(self.options.frame_timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                return Err(CaptureError::CaptureTimeout(self.options.frame_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CaptureError::unavailable("capture worker stopped"))
            }
        };

        // Present only the newest frame
        while let Ok(newer) = running.frames.try_recv() {
            frame = newer;
        }
        Ok(frame)
    }

    fn close(&mut self) {
        if let Some(running) = self.running.take() {
            self.shutdown(running);
            info!("Capture worker for {} stopped", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for ThreadedSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{Scripted, SyntheticSource};
    use crate::capture::PixelFormat;

    fn options() -> WorkerOptions {
        WorkerOptions {
            queue_depth: 2,
            open_timeout: Duration::from_secs(2),
            frame_timeout: Duration::from_secs(2),
            pin_core: None,
            max_fps: 0,
        }
    }

    #[test]
    fn delivers_frames_from_worker_thread() {
        let inner = SyntheticSource::new("synthetic", 8, 4, PixelFormat::Bgr8);
        let mut source = ThreadedSource::new(Box::new(inner), options());

        source.open().unwrap();
        assert!(source.is_open());
        let frame = source.capture().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 4));
        let later = source.capture().unwrap();
        assert!(later.meta.sequence > frame.meta.sequence);
        source.close();
        assert!(!source.is_open());
    }

    #[test]
    fn open_failure_is_reported_and_source_kept() {
        let inner = SyntheticSource::new("dead", 2, 2, PixelFormat::Rgb8).refusing_open();
        let mut source = ThreadedSource::new(Box::new(inner), options());

        let err = source.open().unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
        assert!(!source.is_open());
        // The wrapped source came back from the worker and can be retried
        assert!(matches!(
            source.open().unwrap_err(),
            CaptureError::DeviceUnavailable(_)
        ));
    }

    #[test]
    fn capture_failures_come_back_as_errors() {
        let inner = SyntheticSource::new("stalled", 2, 2, PixelFormat::Rgb8)
            .with_script(std::iter::repeat(Scripted::Timeout).take(1000));
        let mut source = ThreadedSource::new(Box::new(inner), options());
        source.open().unwrap();
        thread::sleep(Duration::from_millis(30));

        assert!(matches!(
            source.capture(),
            Err(CaptureError::CaptureTimeout(_))
        ));
    }

    #[test]
    fn queued_frame_wins_over_an_older_failure() {
        let inner = SyntheticSource::new("flaky", 2, 2, PixelFormat::Rgb8)
            .with_script([Scripted::Timeout]);
        let mut source = ThreadedSource::new(Box::new(inner), options());
        source.open().unwrap();

        // The failure, the backoff and then fresh frames all land before we ask
        thread::sleep(Duration::from_millis(100));
        let frame = source.capture().unwrap();
        assert!(frame.meta.sequence >= 1);
        assert!(source.capture().is_ok());
    }

    #[test]
    fn full_queue_drops_oldest_without_blocking_the_worker() {
        let inner = SyntheticSource::new("fast", 2, 2, PixelFormat::Rgb8);
        let mut source = ThreadedSource::new(
            Box::new(inner),
            WorkerOptions {
                queue_depth: 1,
                ..options()
            },
        );
        source.open().unwrap();

        // Let the worker overfill a one-slot queue
        thread::sleep(Duration::from_millis(50));
        let first = source.capture().unwrap();
        assert!(first.meta.sequence > 1, "stale frame {}", first.meta.sequence);

        // A blocked worker would hand back the frame right after `first`
        thread::sleep(Duration::from_millis(50));
        let second = source.capture().unwrap();
        assert!(
            second.meta.sequence > first.meta.sequence + 1,
            "worker stalled at {} after {}",
            second.meta.sequence,
            first.meta.sequence
        );

        // Back to back, the consumer always moves forward
        let third = source.capture().unwrap();
        assert!(third.meta.sequence > second.meta.sequence);
        source.close();
    }

    #[test]
    fn capture_before_open_is_not_open() {
        let inner = SyntheticSource::new("s", 2, 2, PixelFormat::Rgb8);
        let mut source = ThreadedSource::new(Box::new(inner), options());
        assert!(matches!(source.capture(), Err(CaptureError::NotOpen)));
    }

    #[test]
    fn close_stops_a_busy_worker_and_keeps_the_source() {
        let inner = SyntheticSource::new("busy", 2, 2, PixelFormat::Rgb8);
        let mut source = ThreadedSource::new(
            Box::new(inner),
            WorkerOptions {
                queue_depth: 1,
                ..options()
            },
        );
        source.open().unwrap();
        thread::sleep(Duration::from_millis(20));

        // The worker still holds a frame receiver, so the stop flag alone ends it
        let started = Instant::now();
        source.close();
        assert!(started.elapsed() < options().frame_timeout);
        assert!(!source.is_open());

        // Joined, not detached: the source is available again
        source.open().unwrap();
        assert!(source.capture().is_ok());
    }

    #[test]
    fn close_then_reopen_restarts_worker() {
        let inner = SyntheticSource::new("s", 2, 2, PixelFormat::Rgb8);
        let mut source = ThreadedSource::new(Box::new(inner), options());
        source.open().unwrap();
        source.close();
        source.close();
        source.open().unwrap();
        assert!(source.capture().is_ok());
    }
}
