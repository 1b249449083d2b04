use serde::{Deserialize, Serialize};

use crate::capture::frame::PixelFormat;

/// How many `/dev/videoN` nodes are probed for cameras
pub const DEVICE_SEARCH_LENGTH: u32 = 10;

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Probe `/dev/video0..9` for capture devices, MJPEG preferred over YUYV.
#[cfg(feature = "v4l-capture")]
pub fn detect_devices() -> Vec<FoundDevice> {
    use std::path::Path;
    use tracing::{debug, info};
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    info!("Auto-detecting capture devices...");

    let mut found = Vec::new();
    for i in 0..DEVICE_SEARCH_LENGTH {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            debug!("{} could not be opened", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        // Check for capture capability
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        let Ok(formats) = dev.enum_formats() else {
            continue;
        };
        let has = |code: &[u8; 4]| formats.iter().any(|f| f.fourcc == FourCC::new(code));
        let format = if has(b"MJPG") {
            Some(PixelFormat::Mjpeg)
        } else if has(b"YUYV") {
            Some(PixelFormat::Yuyv4)
        } else {
            None
        };

        if let Some(format) = format {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            found.push(FoundDevice::new(path, format));
        }
    }
    found
}

/// Parse a number typed by a user, tolerating surrounding whitespace.
pub fn parse_number(input: &str) -> Option<f64> {
    input.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_number_rejects_garbage() {
        assert_eq!(parse_number(" 2.5\n"), Some(2.5));
        assert_eq!(parse_number("-1"), Some(-1.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number(""), None);
    }
}
