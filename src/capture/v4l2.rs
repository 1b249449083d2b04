//! V4L2 camera source with memory-mapped buffers

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{Frame, FrameMetadata, PixelFormat, SourceId};
use super::source::CaptureSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

pub struct V4l2Source {
    id: SourceId,
    path: String,
    device: Option<Box<Device>>,
    stream: Option<MmapStream<'static>>,
    width: u32,
    height: u32,
    format: PixelFormat,
    native_rate: f64,
}

impl V4l2Source {
    /// Open `path` and negotiate resolution and pixel format.
    pub fn open(id: SourceId, path: &str, config: &CaptureConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Device(format!(
                "{path} doesn't support video capture"
            )));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        };
        let fmt = device.set_format(&fmt)?;
        if fmt.width != config.width || fmt.height != config.height {
            warn!(
                "{} negotiated {}x{} instead of {}x{}",
                path, fmt.width, fmt.height, config.width, config.height
            );
        }

        let native_rate = match device.params() {
            Ok(params) if params.interval.numerator > 0 => {
                params.interval.denominator as f64 / params.interval.numerator as f64
            }
            _ => {
                warn!("{} did not report a frame interval, assuming {} fps", path, config.fps);
                config.fps
            }
        };

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)?;
        info!(
            "Capture stream started with {} buffers at {:.1} fps",
            config.buffer_count, native_rate
        );

        Ok(Self {
            id,
            path: path.to_string(),
            device: Some(Box::new(device)),
            stream: Some(stream),
            width: fmt.width,
            height: fmt.height,
            format: config.format,
            native_rate,
        })
    }
}

impl CaptureSource for V4l2Source {
    fn id(&self) -> SourceId {
        self.id
    }

    #[instrument(skip(self), fields(source = %self.id))]
    fn acquire(&mut self) -> Result<Frame, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::NotStarted)?;

        // Blocks until the driver hands over the next buffer
        let (buf, meta) = stream.next()?;
        let timestamp = Instant::now();
        if buf.is_empty() {
            return Err(CaptureError::SourceLost(self.id));
        }

        let data = Bytes::copy_from_slice(buf);
        let frame_meta = FrameMetadata {
            source: self.id,
            sequence: meta.sequence as u64,
            width: self.width,
            height: self.height,
            stride: self.width * self.format.bytes_per_pixel().unwrap_or(0),
            format: self.format,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        };

        Ok(Frame {
            data,
            meta: Arc::new(frame_meta),
            timestamp,
        })
    }

    fn native_rate(&self) -> f64 {
        self.native_rate
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            debug!("Stopping capture stream on {}", self.path);
        }
        if self.device.take().is_some() {
            info!("Released {}", self.path);
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.release();
    }
}
