pub mod capture;
pub mod display;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use capture::decoder::StreamFormat;
pub use capture::{Frame, FrameSource, PixelFormat};

/// Prefix for environment overrides, e.g. `FRAMEDECK__CAPTURE__CAMERA__DEVICE_INDEX=1`
pub const ENV_PREFIX: &str = "FRAMEDECK";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub desktop: DesktopConfig,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopConfig {
    pub enabled: bool,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub enabled: bool,
    /// Opens `/dev/video{device_index}`
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: StreamFormat,
    pub buffer_count: u32,
    /// Longest a single capture may wait for the driver
    pub timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
            format: StreamFormat::Mjpeg,
            buffer_count: 4,
            timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub snapshot_dir: PathBuf,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            title: "framedeck".into(),
            snapshot_dir: PathBuf::from("snapshots"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Capture on the draw thread
    Inline,
    /// One capture thread per source
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: CaptureMode,
    pub queue_depth: usize,
    pub open_timeout_ms: u64,
    /// Consecutive capture failures before a slot is reopened, 0 to never reopen
    pub reopen_after_failures: u32,
    pub pin_worker_core: Option<usize>,
    pub worker_fps: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Inline,
            queue_depth: 2,
            open_timeout_ms: 5000,
            reopen_after_failures: 30,
            pin_worker_core: None,
            // 60fps target
            worker_fps: 60,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `FRAMEDECK__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
