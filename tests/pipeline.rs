use std::time::Duration;

use framedeck::capture::synthetic::{Scripted, SyntheticSource};
use framedeck::capture::PixelFormat;
use framedeck::display::{MemoryBackend, SlotState};
use framedeck::pipeline::worker::{ThreadedSource, WorkerOptions};
use framedeck::pipeline::{CaptureContext, SlotHealth};

fn context() -> CaptureContext<MemoryBackend> {
    CaptureContext::new(MemoryBackend::new(), 0)
}

#[test]
fn desktop_and_camera_slots_present_every_cycle() {
    let mut ctx = context();
    ctx.add_slot(
        "Desktop",
        Box::new(SyntheticSource::new("Desktop", 64, 32, PixelFormat::Bgra8)),
    )
    .unwrap();
    ctx.add_slot(
        "Camera",
        Box::new(SyntheticSource::new("Camera", 32, 24, PixelFormat::Bgr8)),
    )
    .unwrap();

    for _ in 0..5 {
        let views = ctx.cycle();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.health == SlotHealth::Live));
    }

    let views = ctx.views();
    let desktop = views[0].presented.unwrap();
    let camera = views[1].presented.unwrap();
    assert_ne!(desktop.handle, camera.handle);
    assert_eq!((desktop.width, desktop.height), (64, 32));
    assert_eq!((camera.width, camera.height), (32, 24));

    let backend = ctx.presenter().backend();
    assert_eq!(backend.live_textures(), 2);
    assert_eq!(backend.texture(desktop.handle).unwrap().uploads, 5);
    assert_eq!(backend.texture(desktop.handle).unwrap().data.len(), 64 * 32 * 3);
}

#[test]
fn failed_slot_does_not_stop_the_others() {
    let mut ctx = context();
    ctx.add_slot(
        "Camera",
        Box::new(SyntheticSource::new("Camera", 4, 4, PixelFormat::Bgr8).refusing_open()),
    )
    .unwrap();
    ctx.add_slot(
        "Desktop",
        Box::new(SyntheticSource::new("Desktop", 4, 4, PixelFormat::Bgra8)),
    )
    .unwrap();

    for _ in 0..3 {
        ctx.cycle();
    }
    let views = ctx.views();
    assert!(matches!(views[0].health, SlotHealth::Failed(_)));
    assert_eq!(ctx.presenter().state("Camera"), SlotState::Uninitialized);
    assert_eq!(views[1].stats.frames_presented, 3);
}

#[test]
fn display_resize_keeps_the_same_texture() {
    let mut ctx = context();
    let source = SyntheticSource::new("Desktop", 640, 480, PixelFormat::Bgra8).with_script([
        Scripted::Resize {
            width: 640,
            height: 480,
        },
        Scripted::Resize {
            width: 1280,
            height: 720,
        },
        Scripted::Resize {
            width: 640,
            height: 480,
        },
        Scripted::Resize {
            width: 1280,
            height: 720,
        },
    ]);
    ctx.add_slot("Desktop", Box::new(source)).unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        let shown = ctx.cycle()[0].presented.unwrap();
        seen.push(shown);
    }

    assert!(seen.windows(2).all(|w| w[0].handle == w[1].handle));
    let sizes: Vec<_> = seen.iter().map(|p| (p.width, p.height)).collect();
    assert_eq!(sizes, vec![(640, 480), (1280, 720), (640, 480), (1280, 720)]);

    let tex = ctx.presenter().backend().texture(seen[0].handle).unwrap();
    assert_eq!(tex.resizes, 4);
}

#[test]
fn stalled_camera_holds_last_frame() {
    let mut ctx = context();
    let source = SyntheticSource::new("Camera", 8, 8, PixelFormat::Bgr8).with_script([
        Scripted::Resize {
            width: 8,
            height: 8,
        },
        Scripted::Empty,
        Scripted::Timeout,
        Scripted::Empty,
    ]);
    ctx.add_slot("Camera", Box::new(source)).unwrap();

    let first = ctx.cycle()[0].presented.unwrap();
    let checksum = ctx.presenter().backend().texture(first.handle).unwrap().checksum();

    for _ in 0..3 {
        let view = ctx.cycle().remove(0);
        assert_eq!(view.presented, Some(first));
        assert_eq!(view.health, SlotHealth::Live);
    }
    assert_eq!(
        ctx.presenter().backend().texture(first.handle).unwrap().checksum(),
        checksum
    );

    let view = &ctx.views()[0];
    assert_eq!(view.stats.frames_held, 2);
    assert_eq!(view.stats.capture_failures, 1);
}

#[test]
fn snapshot_round_trips_through_png() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context();
    ctx.add_slot(
        "Camera",
        Box::new(SyntheticSource::new("Camera", 5, 4, PixelFormat::Bgr8)),
    )
    .unwrap();
    let shown = ctx.cycle()[0].presented.unwrap();

    let path = ctx.snapshot("Camera", dir.path()).unwrap();
    let png = image::open(&path).unwrap().to_rgb8();
    let uploaded = &ctx.presenter().backend().texture(shown.handle).unwrap().data;
    assert_eq!(png.as_raw(), uploaded);
}

#[test]
fn worker_sources_feed_the_context() {
    let options = WorkerOptions {
        queue_depth: 2,
        open_timeout: Duration::from_secs(2),
        frame_timeout: Duration::from_secs(2),
        pin_core: None,
        max_fps: 0,
    };
    let mut ctx = context();
    ctx.add_slot(
        "Desktop",
        Box::new(ThreadedSource::new(
            Box::new(SyntheticSource::new("Desktop", 16, 16, PixelFormat::Bgra8)),
            options,
        )),
    )
    .unwrap();
    ctx.add_slot(
        "Camera",
        Box::new(ThreadedSource::new(
            Box::new(SyntheticSource::new("Camera", 8, 8, PixelFormat::Bgr8).refusing_open()),
            options,
        )),
    )
    .unwrap();

    for _ in 0..3 {
        ctx.cycle();
    }
    let views = ctx.views();
    assert_eq!(views[0].health, SlotHealth::Live);
    assert_eq!(views[0].stats.frames_presented, 3);
    assert!(matches!(views[1].health, SlotHealth::Failed(_)));

    ctx.shutdown();
    assert_eq!(ctx.presenter().backend().live_textures(), 0);
}
