use serde::{Deserialize, Serialize};

use crate::capture::decoder::StreamFormat;

/// Highest `/dev/video{N}` index checked when listing cameras
pub const MAX_DEVICE_INDEX: u32 = 16;

/// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub index: u32,
    pub path: String,
    pub card: String,
    /// Stream formats the device offers that we can decode, in driver order
    pub formats: Vec<StreamFormat>,
}

/// The format to request from a device offering `offered`.
///
/// `wanted` when offered, otherwise MJPEG, otherwise the first decodable one.
/// A device that enumerates nothing gets `wanted` and the driver decides.
pub fn choose_format(offered: &[StreamFormat], wanted: StreamFormat) -> Option<StreamFormat> {
    if offered.is_empty() || offered.contains(&wanted) {
        return Some(wanted);
    }
    offered
        .iter()
        .copied()
        .find(|f| *f == StreamFormat::Mjpeg)
        .or_else(|| offered.first().copied())
}

/// Stream formats `device` offers that the decoder understands
#[cfg(target_os = "linux")]
pub fn decodable_formats(device: &v4l::Device) -> Vec<StreamFormat> {
    use v4l::video::Capture;

    device
        .enum_formats()
        .map(|descs| {
            descs
                .iter()
                .filter_map(|d| StreamFormat::from_fourcc(d.fourcc.repr))
                .collect()
        })
        .unwrap_or_default()
}

/// Scan `/dev/video*` for capture devices.
#[cfg(target_os = "linux")]
pub fn enumerate_cameras() -> Vec<FoundDevice> {
    use std::path::Path;

    use tracing::{debug, info};
    use v4l::{capability::Flags, Device};

    info!("Scanning capture devices...");
    let mut found = Vec::new();

    for index in 0..MAX_DEVICE_INDEX {
        let path = format!("/dev/video{index}");
        if !Path::new(&path).exists() {
            continue;
        }

        let dev = match Device::with_path(&path) {
            Ok(dev) => dev,
            Err(e) => {
                debug!("{path}: {e}");
                continue;
            }
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        // Metadata nodes show up as /dev/video* too
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        info!("Found {path} - {}", caps.card);
        found.push(FoundDevice {
            index,
            path,
            card: caps.card,
            formats: decodable_formats(&dev),
        });
    }

    found
}

#[cfg(not(target_os = "linux"))]
pub fn enumerate_cameras() -> Vec<FoundDevice> {
    Vec::new()
}
