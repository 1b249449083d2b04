use super::frame::{Frame, SourceId};
use crate::error::CaptureError;

/// A camera or any other producer of raw frames.
///
/// `acquire` may block until the next frame is available. An error means
/// the source is gone; callers do not retry.
pub trait CaptureSource: Send {
    fn id(&self) -> SourceId;

    fn acquire(&mut self) -> Result<Frame, CaptureError>;

    /// Frames per second the source delivers on its own.
    fn native_rate(&self) -> f64;

    fn release(&mut self);
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn id(&self) -> SourceId {
        (**self).id()
    }

    fn acquire(&mut self) -> Result<Frame, CaptureError> {
        (**self).acquire()
    }

    fn native_rate(&self) -> f64 {
        (**self).native_rate()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
