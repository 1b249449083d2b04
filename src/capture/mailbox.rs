//! Single-slot hand-off between an acquisition thread and a paced consumer.

use parking_lot::Mutex;

use super::frame::Frame;

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    fresh: bool,
}

/// Latest frame plus a "new frame ready" flag.
///
/// The consumer never blocks: it gets the fresh frame if one was posted since
/// its last visit, otherwise the last known frame again.
#[derive(Default)]
pub struct LatestFrame {
    slot: Mutex<Slot>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, frame: Frame) {
        let mut slot = self.slot.lock();
        slot.frame = Some(frame);
        slot.fresh = true;
    }

    /// Returns the current frame and whether it is new since the last take.
    pub fn take_or_repeat(&self) -> Option<(Frame, bool)> {
        let mut slot = self.slot.lock();
        let fresh = std::mem::take(&mut slot.fresh);
        slot.frame.clone().map(|frame| (frame, fresh))
    }
}
