//! The per-frame capture → convert → upload cycle.
//!
//! [`CaptureContext`] is owned by whoever drives the event loop and is passed
//! into the draw step by reference; nothing here is global.

pub mod worker;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{CaptureError, Frame, FrameSource, ScreenSource, V4l2Source};
use crate::display::backend::TextureBackend;
use crate::display::convert;
use crate::display::presenter::{Presented, TexturePresenter};
use crate::{CaptureMode, Config};
use worker::{ThreadedSource, WorkerOptions};

/// Slot names used by the stock sources
pub const DESKTOP_SLOT: &str = "Desktop";
pub const CAMERA_SLOT: &str = "Camera";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotHealth {
    /// Not opened yet; the next cycle opens it
    Pending,
    Live,
    /// Open failed; the source is not retried
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct SlotStats {
    pub frames_presented: u64,
    pub frames_held: u64,
    pub capture_failures: u64,
    pub consecutive_failures: u32,
    pub reopens: u32,
    /// Time spent inside the last successful `capture` call
    pub last_capture: Option<Duration>,
    /// Age of the last presented frame when it reached its texture
    pub last_latency: Option<Duration>,
    pub last_error: Option<String>,
}

/// Everything the GUI needs to draw one slot this cycle
#[derive(Debug, Clone)]
pub struct SlotView {
    pub name: String,
    pub presented: Option<Presented>,
    pub health: SlotHealth,
    pub stats: SlotStats,
}

struct Slot {
    name: String,
    source: Box<dyn FrameSource>,
    health: SlotHealth,
    stats: SlotStats,
    last_frame: Option<Frame>,
}

#[derive(Debug, Error)]
#[error("a slot named {0:?} already exists")]
pub struct DuplicateSlot(pub String);

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no slot named {0:?}")]
    UnknownSlot(String),

    #[error("slot {0:?} has not presented a frame yet")]
    NoFrame(String),

    #[error("frame buffer does not match its dimensions")]
    Malformed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

pub struct CaptureContext<B: TextureBackend> {
    slots: Vec<Slot>,
    presenter: TexturePresenter<B>,
    reopen_after_failures: u32,
}

impl<B: TextureBackend> CaptureContext<B> {
    pub fn new(backend: B, reopen_after_failures: u32) -> Self {
        Self {
            slots: Vec::new(),
            presenter: TexturePresenter::new(backend),
            reopen_after_failures,
        }
    }

    /// Register a source under `name`. Names key the texture handles, so they must be unique.
    pub fn add_slot(
        &mut self,
        name: impl Into<String>,
        source: Box<dyn FrameSource>,
    ) -> Result<(), DuplicateSlot> {
        let name = name.into();
        if self.slots.iter().any(|s| s.name == name) {
            return Err(DuplicateSlot(name));
        }
        self.slots.push(Slot {
            name,
            source,
            health: SlotHealth::Pending,
            stats: SlotStats::default(),
            last_frame: None,
        });
        Ok(())
    }

    /// One display cycle: pull a frame from every slot and present it.
    ///
    /// Never fails as a whole; each slot's outcome is in its [`SlotView`].
    pub fn cycle(&mut self) -> Vec<SlotView> {
        let reopen_after = self.reopen_after_failures;
        for slot in &mut self.slots {
            cycle_slot(slot, &mut self.presenter, reopen_after);
        }
        self.views()
    }

    pub fn views(&self) -> Vec<SlotView> {
        self.slots
            .iter()
            .map(|slot| SlotView {
                name: slot.name.clone(),
                presented: self.presenter.presented(&slot.name),
                health: slot.health.clone(),
                stats: slot.stats.clone(),
            })
            .collect()
    }

    pub fn presenter(&self) -> &TexturePresenter<B> {
        &self.presenter
    }

    /// Write `slot`'s last presented frame to `dir` as a PNG.
    pub fn snapshot(&self, slot: &str, dir: &Path) -> Result<PathBuf, SnapshotError> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.name == slot)
            .ok_or_else(|| SnapshotError::UnknownSlot(slot.to_owned()))?;
        let frame = slot
            .last_frame
            .as_ref()
            .ok_or_else(|| SnapshotError::NoFrame(slot.name.clone()))?;

        let rgb = convert::to_upload(frame.format(), &frame.data)
            .map_err(|_| SnapshotError::Malformed)?
            .into_owned();
        let image = image::RgbImage::from_raw(frame.width(), frame.height(), rgb)
            .ok_or(SnapshotError::Malformed)?;

        fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "{}-{:06}.png",
            slot.name.to_lowercase(),
            frame.meta.sequence
        ));
        image.save(&path)?;
        info!("Saved {} snapshot to {}", slot.name, path.display());
        Ok(path)
    }

    /// Close every source and release every texture.
    pub fn shutdown(&mut self) {
        for slot in &mut self.slots {
            slot.source.close();
            slot.last_frame = None;
        }
        self.presenter.release_all();
    }
}

impl<B: TextureBackend> Drop for CaptureContext<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[instrument(skip_all, fields(slot = %slot.name))]
fn cycle_slot<B: TextureBackend>(
    slot: &mut Slot,
    presenter: &mut TexturePresenter<B>,
    reopen_after: u32,
) {
    match slot.health {
        SlotHealth::Failed(_) => return,
        SlotHealth::Pending => match slot.source.open() {
            Ok(()) => {
                info!("{} source is live", slot.name);
                slot.health = SlotHealth::Live;
            }
            Err(e) => {
                fail_slot(slot, e);
                return;
            }
        },
        SlotHealth::Live => {}
    }

    let capture_start = Instant::now();
    let frame = match slot.source.capture() {
        Ok(frame) => frame,
        Err(e) => {
            record_capture_failure(slot, e, reopen_after);
            return;
        }
    };

    let capture_time = capture_start.elapsed();
    metrics::histogram!("capture_time_us", "slot" => slot.name.clone())
        .record(capture_time.as_micros() as f64);
    slot.stats.last_capture = Some(capture_time);
    slot.stats.consecutive_failures = 0;

    match presenter.present(&slot.name, &frame) {
        Ok(shown) => {
            debug!("Presented {}x{} on {}", shown.width, shown.height, shown.handle);
            let latency = frame.timestamp.elapsed();
            metrics::histogram!("capture_latency_us", "slot" => slot.name.clone())
                .record(latency.as_micros() as f64);
            slot.stats.last_latency = Some(latency);
            slot.stats.frames_presented += 1;
            slot.last_frame = Some(frame);
        }
        Err(e) if e.holds_last_frame() => {
            debug!("Holding last frame: {e}");
            slot.stats.frames_held += 1;
        }
        Err(e) => {
            warn!("Present failed: {e}");
            slot.stats.last_error = Some(e.to_string());
        }
    }
}

fn fail_slot(slot: &mut Slot, e: CaptureError) {
    error!("{} source failed to open: {e}", slot.name);
    metrics::counter!("capture_open_failures_total", "slot" => slot.name.clone()).increment(1);
    slot.stats.last_error = Some(e.to_string());
    slot.health = SlotHealth::Failed(e.to_string());
}

fn record_capture_failure(slot: &mut Slot, e: CaptureError, reopen_after: u32) {
    warn!("Capture failed, skipping this cycle: {e}");
    metrics::counter!("capture_failures_total", "slot" => slot.name.clone()).increment(1);
    slot.stats.capture_failures += 1;
    slot.stats.consecutive_failures += 1;
    slot.stats.last_error = Some(e.to_string());

    if reopen_after == 0 || slot.stats.consecutive_failures < reopen_after {
        return;
    }

    info!(
        "{} failed {} times in a row, reopening",
        slot.name, slot.stats.consecutive_failures
    );
    slot.source.close();
    slot.stats.consecutive_failures = 0;
    slot.stats.reopens += 1;
    if let Err(e) = slot.source.open() {
        fail_slot(slot, e);
    }
}

/// Build the enabled sources described by `config`, wrapped in capture
/// workers when the pipeline runs in worker mode.
pub fn sources_from_config(config: &Config) -> Vec<(String, Box<dyn FrameSource>)> {
    let mut sources: Vec<(String, Box<dyn FrameSource>)> = Vec::new();

    if config.capture.desktop.enabled {
        sources.push((
            DESKTOP_SLOT.to_owned(),
            Box::new(ScreenSource::new(DESKTOP_SLOT)),
        ));
    }
    if config.capture.camera.enabled {
        sources.push((
            CAMERA_SLOT.to_owned(),
            Box::new(V4l2Source::new(CAMERA_SLOT, config.capture.camera.clone())),
        ));
    }

    if config.pipeline.mode == CaptureMode::Worker {
        let options = worker_options(config);
        sources = sources
            .into_iter()
            .map(|(name, source)| {
                let threaded: Box<dyn FrameSource> = Box::new(ThreadedSource::new(source, options));
                (name, threaded)
            })
            .collect();
    }

    sources
}

fn worker_options(config: &Config) -> WorkerOptions {
    let camera_wait = Duration::from_millis(config.capture.camera.timeout_ms);
    WorkerOptions {
        queue_depth: config.pipeline.queue_depth,
        open_timeout: Duration::from_millis(config.pipeline.open_timeout_ms),
        // Long enough for the slowest source to finish its own bounded wait
        frame_timeout: camera_wait + Duration::from_millis(100),
        pin_core: config.pipeline.pin_worker_core,
        max_fps: config.pipeline.worker_fps,
    }
}
