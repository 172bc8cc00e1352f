//! Frame-to-texture presentation under stable per-slot handles.
//!
//! Each slot moves `Uninitialized -> Allocated` on its first good frame and
//! then stays `Allocated`, re-uploading in place, until teardown releases
//! every handle together.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, instrument};

use super::backend::{SamplerPolicy, TextureBackend, TextureHandle};
use super::convert;
use crate::capture::frame::{frame_len, Frame};

#[derive(Debug, Error)]
pub enum PresentError {
    /// Zero-size frame; the slot keeps showing its last good content.
    #[error("frame is empty, holding the previous texture")]
    EmptyFrame,

    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    #[error("texture backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PresentError {
    /// Whether the slot's previous texture content is still what is displayed
    pub fn holds_last_frame(&self) -> bool {
        matches!(self, PresentError::EmptyFrame | PresentError::Malformed { .. })
    }
}

/// What the GUI layer needs to draw a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presented {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Uninitialized,
    Allocated { handle: TextureHandle },
}

#[derive(Debug)]
struct SlotTexture {
    handle: TextureHandle,
    /// Dimensions of the last successful upload
    size: Option<(u32, u32)>,
    uploads: u64,
}

pub struct TexturePresenter<B: TextureBackend> {
    backend: B,
    slots: HashMap<String, SlotTexture>,
}

impl<B: TextureBackend> TexturePresenter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            slots: HashMap::new(),
        }
    }

    /// Convert `frame` to RGB8 and upload it into `slot`'s texture,
    /// allocating the texture on first use.
    #[instrument(skip(self, frame), fields(w = frame.width(), h = frame.height()))]
    pub fn present(&mut self, slot: &str, frame: &Frame) -> Result<Presented, PresentError> {
        if frame.is_empty() {
            metrics::counter!("frames_held_total", "slot" => slot.to_owned()).increment(1);
            return Err(PresentError::EmptyFrame);
        }

        let (width, height) = (frame.width(), frame.height());
        let expected = frame_len(width, height, frame.format());
        if frame.data.len() != expected {
            metrics::counter!("frames_held_total", "slot" => slot.to_owned()).increment(1);
            return Err(PresentError::Malformed {
                expected,
                actual: frame.data.len(),
            });
        }

        let rgb = convert::to_upload(frame.format(), &frame.data).map_err(|_| {
            PresentError::Malformed {
                expected,
                actual: frame.data.len(),
            }
        })?;

        let texture = match self.slots.entry(slot.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let handle = self
                    .backend
                    .allocate(slot, SamplerPolicy::FRAME)
                    .map_err(|e| PresentError::Backend(Box::new(e)))?;
                info!("Allocated {handle} for slot {slot:?}");
                entry.insert(SlotTexture {
                    handle,
                    size: None,
                    uploads: 0,
                })
            }
        };

        let upload_start = Instant::now();
        self.backend
            .upload(texture.handle, width, height, &rgb)
            .map_err(|e| PresentError::Backend(Box::new(e)))?;

        if texture.size != Some((width, height)) {
            debug!("Slot {slot:?} texture storage now {width}x{height}");
        }
        texture.size = Some((width, height));
        texture.uploads += 1;

        metrics::histogram!("upload_time_us", "slot" => slot.to_owned())
            .record(upload_start.elapsed().as_micros() as f64);

        Ok(Presented {
            handle: texture.handle,
            width,
            height,
        })
    }

    pub fn state(&self, slot: &str) -> SlotState {
        match self.slots.get(slot) {
            Some(t) => SlotState::Allocated { handle: t.handle },
            None => SlotState::Uninitialized,
        }
    }

    /// Handle and size of the last successful upload for `slot`
    pub fn presented(&self, slot: &str) -> Option<Presented> {
        let t = self.slots.get(slot)?;
        let (width, height) = t.size?;
        Some(Presented {
            handle: t.handle,
            width,
            height,
        })
    }

    pub fn uploads(&self, slot: &str) -> u64 {
        self.slots.get(slot).map_or(0, |t| t.uploads)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Release every slot's texture. Slots return to `Uninitialized`.
    pub fn release_all(&mut self) {
        for (slot, texture) in self.slots.drain() {
            debug!("Releasing {} for slot {slot:?}", texture.handle);
            self.backend.release(texture.handle);
        }
    }
}

impl<B: TextureBackend> Drop for TexturePresenter<B> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use crate::display::headless::MemoryBackend;

    fn bgr(width: u32, height: u32, seed: u8) -> Frame {
        let data: Vec<u8> = (0..width * height * 3)
            .map(|i| (i as u8).wrapping_add(seed))
            .collect();
        Frame::new(width, height, PixelFormat::Bgr8, data).unwrap()
    }

    fn content(p: &TexturePresenter<MemoryBackend>, h: TextureHandle) -> u64 {
        p.backend().texture(h).unwrap().checksum()
    }

    #[test]
    fn first_present_allocates_with_fixed_sampler() {
        let mut p = TexturePresenter::new(MemoryBackend::new());
        assert_eq!(p.state("desktop"), SlotState::Uninitialized);

        let shown = p.present("desktop", &bgr(2, 2, 0)).unwrap();
        assert_eq!(p.state("desktop"), SlotState::Allocated { handle: shown.handle });

        let tex = p.backend().texture(shown.handle).unwrap();
        assert_eq!(tex.sampler, SamplerPolicy::FRAME);
        assert_eq!(tex.label, "desktop");
    }

    #[test]
    fn two_by_two_bgr_uploads_rgb() {
        let mut p = TexturePresenter::new(MemoryBackend::new());
        let src = vec![
            0xB0, 0x60, 0xA0, //
            0xB1, 0x61, 0xA1, //
            0xB2, 0x62, 0xA2, //
            0xB3, 0x63, 0xA3,
        ];
        let frame = Frame::new(2, 2, PixelFormat::Bgr8, src).unwrap();
        let shown = p.present("camera", &frame).unwrap();

        let tex = p.backend().texture(shown.handle).unwrap();
        assert_eq!(
            tex.data,
            vec![
                0xA0, 0x60, 0xB0, //
                0xA1, 0x61, 0xB1, //
                0xA2, 0x62, 0xB2, //
                0xA3, 0x63, 0xB3,
            ]
        );
    }

    #[test]
    fn repeated_present_is_idempotent() {
        let mut once = TexturePresenter::new(MemoryBackend::new());
        let mut twice = TexturePresenter::new(MemoryBackend::new());
        let frame = bgr(8, 4, 3);

        let a = once.present("s", &frame).unwrap();
        let b1 = twice.present("s", &frame).unwrap();
        let b2 = twice.present("s", &frame).unwrap();

        assert_eq!(b1, b2);
        assert_eq!(content(&once, a.handle), content(&twice, b2.handle));
        assert_eq!(
            once.backend().texture(a.handle).unwrap().data,
            twice.backend().texture(b2.handle).unwrap().data
        );
    }

    #[test]
    fn empty_frame_holds_last_content() {
        let mut p = TexturePresenter::new(MemoryBackend::new());
        let shown = p.present("s", &bgr(4, 4, 9)).unwrap();
        let before = content(&p, shown.handle);

        let err = p.present("s", &Frame::empty(PixelFormat::Bgr8)).unwrap_err();
        assert!(matches!(err, PresentError::EmptyFrame));
        assert!(err.holds_last_frame());

        assert_eq!(p.state("s"), SlotState::Allocated { handle: shown.handle });
        assert_eq!(content(&p, shown.handle), before);
        assert_eq!(p.presented("s"), Some(shown));
    }

    #[test]
    fn empty_frame_on_fresh_slot_does_not_allocate() {
        let mut p = TexturePresenter::new(MemoryBackend::new());
        assert!(p.present("s", &Frame::empty(PixelFormat::Rgb8)).is_err());
        assert_eq!(p.state("s"), SlotState::Uninitialized);
        assert_eq!(p.backend().live_textures(), 0);
    }

    #[test]
    fn handle_is_stable_across_alternating_sizes() {
        let mut p = TexturePresenter::new(MemoryBackend::new());
        let mut handles = Vec::new();
        for (i, (w, h)) in [(640, 480), (1280, 720), (640, 480), (1280, 720)]
            .into_iter()
            .enumerate()
        {
            let shown = p.present("desktop", &bgr(w, h, i as u8)).unwrap();
            assert_eq!((shown.width, shown.height), (w, h));
            assert_eq!(p.presented("desktop").map(|s| (s.width, s.height)), Some((w, h)));
            handles.push(shown.handle);
        }
        assert!(handles.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(p.backend().live_textures(), 1);
    }

    #[test]
    fn handle_survives_format_change() {
        let mut p = TexturePresenter::new(MemoryBackend::new());
        let a = p.present("s", &bgr(2, 1, 0)).unwrap();
        let bgra = Frame::new(2, 1, PixelFormat::Bgra8, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let b = p.present("s", &bgra).unwrap();
        assert_eq!(a.handle, b.handle);
        assert_eq!(p.backend().texture(b.handle).unwrap().data, vec![3, 2, 1, 7, 6, 5]);
    }

    #[test]
    fn malformed_frame_is_rejected_without_upload() {
        let mut p = TexturePresenter::new(MemoryBackend::new());
        let shown = p.present("s", &bgr(2, 2, 0)).unwrap();

        let mut bad = bgr(2, 2, 1);
        bad.data = bad.data.slice(..5);
        let err = p.present("s", &bad).unwrap_err();
        assert!(matches!(err, PresentError::Malformed { expected: 12, actual: 5 }));
        assert_eq!(p.uploads("s"), 1);
        assert_eq!(p.presented("s"), Some(shown));
    }

    #[test]
    fn slots_get_distinct_handles() {
        let mut p = TexturePresenter::new(MemoryBackend::new());
        let a = p.present("desktop", &bgr(2, 2, 0)).unwrap();
        let b = p.present("camera", &bgr(2, 2, 0)).unwrap();
        assert_ne!(a.handle, b.handle);
    }

    #[test]
    fn release_all_frees_every_handle() {
        let mut p = TexturePresenter::new(MemoryBackend::new());
        let a = p.present("desktop", &bgr(2, 2, 0)).unwrap();
        let b = p.present("camera", &bgr(2, 2, 0)).unwrap();

        p.release_all();
        let mut released = p.backend().released().to_vec();
        released.sort();
        assert_eq!(released, vec![a.handle, b.handle]);
        assert_eq!(p.state("desktop"), SlotState::Uninitialized);
        assert_eq!(p.backend().live_textures(), 0);
    }
}
