//! framedeck: desktop and camera capture shown as live GPU textures

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use eframe::egui_wgpu;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use framedeck::capture::SyntheticSource;
use framedeck::display::{gpu, FrameDeckApp, MemoryBackend};
use framedeck::pipeline::{self, CaptureContext, SlotHealth};
use framedeck::{utils, CaptureMode, Config, FrameSource, PixelFormat};

/// Pacing between headless cycles
const HEADLESS_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capture from /dev/video<N>
    #[arg(long)]
    camera_index: Option<u32>,

    #[arg(long)]
    no_desktop: bool,

    #[arg(long)]
    no_camera: bool,

    /// Add a generated test-pattern slot
    #[arg(long)]
    synthetic: bool,

    /// Capture on one thread per source
    #[arg(long)]
    worker: bool,

    /// Run this many cycles against in-memory textures, without a window
    #[arg(long, value_name = "CYCLES")]
    headless: Option<u64>,

    /// Print the cameras found and exit
    #[arg(long)]
    list_devices: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(index) = self.camera_index {
            config.capture.camera.device_index = index;
        }
        if self.no_desktop {
            config.capture.desktop.enabled = false;
        }
        if self.no_camera {
            config.capture.camera.enabled = false;
        }
        if self.worker {
            config.pipeline.mode = CaptureMode::Worker;
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framedeck=info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();

    if cli.list_devices {
        let devices = utils::enumerate_cameras();
        if devices.is_empty() {
            println!("No capture devices found");
        }
        for dev in devices {
            println!("{}  {}  {:?}", dev.path, dev.card, dev.formats);
        }
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    info!("framedeck launching...");

    let mut sources = pipeline::sources_from_config(&config);
    if cli.synthetic {
        sources.push((
            "Pattern".to_owned(),
            Box::new(SyntheticSource::new("Pattern", 320, 240, PixelFormat::Bgr8)),
        ));
    }
    if sources.is_empty() {
        return Err(eyre!("Every source is disabled, nothing to show"));
    }

    match cli.headless {
        Some(cycles) => run_headless(&config, sources, cycles),
        None => run_window(config, sources),
    }
}

fn run_headless(
    config: &Config,
    sources: Vec<(String, Box<dyn FrameSource>)>,
    cycles: u64,
) -> Result<()> {
    let mut context =
        CaptureContext::new(MemoryBackend::new(), config.pipeline.reopen_after_failures);
    for (name, source) in sources {
        context.add_slot(name, source)?;
    }

    let mut views = Vec::new();
    for _ in 0..cycles {
        views = context.cycle();
        thread::sleep(HEADLESS_INTERVAL);
    }

    for view in &views {
        let size = view
            .presented
            .map(|p| format!("{}x{}", p.width, p.height))
            .unwrap_or_else(|| "-".into());
        let health = match &view.health {
            SlotHealth::Failed(reason) => format!("failed ({reason})"),
            other => format!("{other:?}").to_lowercase(),
        };
        let latency = view
            .stats
            .last_latency
            .map(|d| format!("{:.1} ms", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "-".into());
        info!(
            "{}: {health}, {size}, presented {}, held {}, failed {}, reopens {}, {latency}",
            view.name,
            view.stats.frames_presented,
            view.stats.frames_held,
            view.stats.capture_failures,
            view.stats.reopens
        );
        if let Some(e) = &view.stats.last_error {
            info!("{}: last error: {e}", view.name);
        }
    }

    context.shutdown();
    info!("framedeck shutting down");
    Ok(())
}

fn wgpu_options() -> egui_wgpu::WgpuConfiguration {
    let mut options = egui_wgpu::WgpuConfiguration::default();
    if let egui_wgpu::WgpuSetup::CreateNew {
        device_descriptor, ..
    } = &mut options.wgpu_setup
    {
        *device_descriptor = Arc::new(gpu::device_descriptor);
    }
    options
}

fn run_window(config: Config, sources: Vec<(String, Box<dyn FrameSource>)>) -> Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(config.display.title.as_str())
            .with_inner_size([config.display.width as f32, config.display.height as f32])
            .with_resizable(true),
        renderer: eframe::Renderer::Wgpu,
        wgpu_options: wgpu_options(),
        ..Default::default()
    };

    let title = config.display.title.clone();
    eframe::run_native(
        &title,
        options,
        Box::new(move |cc| Ok(Box::new(FrameDeckApp::new(cc, &config, sources)?))),
    )
    .map_err(|e| eyre!("Display loop failed: {e}"))?;

    info!("framedeck shutting down");
    Ok(())
}
