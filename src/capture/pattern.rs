//! Synthetic test-pattern source
//!
//! Produces RGB24 frames with a vertical bar sweeping across a gradient.
//! Useful without a camera attached and as a deterministic source in tests.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::info;

use super::frame::{Frame, FrameMetadata, PixelFormat, SourceId};
use super::source::CaptureSource;
use crate::error::CaptureError;

pub struct PatternSource {
    id: SourceId,
    width: u32,
    height: u32,
    rate: f64,
    sequence: u64,
    paced: bool,
    next_due: Option<Instant>,
    fail_after: Option<u64>,
    released: bool,
}

impl PatternSource {
    pub fn new(id: SourceId, width: u32, height: u32, rate: f64) -> Self {
        Self {
            id,
            width: width.max(1),
            height: height.max(1),
            rate,
            sequence: 0,
            paced: true,
            next_due: None,
            fail_after: None,
            released: false,
        }
    }

    /// Return frames immediately instead of at the native rate.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Report the source as lost after `frames` successful acquisitions.
    pub fn fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar = (self.sequence as usize * 4) % w;
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                if x.abs_diff(bar) < 3 {
                    data.extend_from_slice(&[255, 255, 255]);
                } else {
                    let r = (x * 255 / w.max(2)) as u8;
                    let g = (y * 255 / h.max(2)) as u8;
                    data.extend_from_slice(&[r, g, (self.sequence % 256) as u8]);
                }
            }
        }
        data
    }

    fn wait_for_due(&mut self) {
        let period = Duration::from_secs_f64(1.0 / self.rate);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // Do not bank time while nobody was asking
        self.next_due = Some(due.max(now) + period);
    }
}

impl CaptureSource for PatternSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn acquire(&mut self) -> Result<Frame, CaptureError> {
        if self.released || self.fail_after.is_some_and(|n| self.sequence >= n) {
            return Err(CaptureError::SourceLost(self.id));
        }
        if self.paced {
            self.wait_for_due();
        }

        let data = self.render();
        let meta = FrameMetadata {
            source: self.id,
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            stride: self.width * 3,
            format: PixelFormat::Rgb24,
            device_timestamp: None,
        };
        self.sequence += 1;
        Ok(Frame::new(Bytes::from(data), meta, Instant::now()))
    }

    fn native_rate(&self) -> f64 {
        self.rate
    }

    fn release(&mut self) {
        if !self.released {
            info!(source = %self.id, frames = self.sequence, "pattern source released");
            self.released = true;
        }
    }
}
