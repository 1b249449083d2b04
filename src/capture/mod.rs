pub mod decoder;
pub mod frame;
pub mod mailbox;
pub mod pattern;
pub mod source;
#[cfg(feature = "v4l-capture")]
pub mod v4l2;

pub use decoder::{decode_frame, RgbImage};
pub use frame::{Frame, FrameMetadata, PixelFormat, SourceId};
pub use mailbox::LatestFrame;
pub use pattern::PatternSource;
pub use source::CaptureSource;
#[cfg(feature = "v4l-capture")]
pub use v4l2::V4l2Source;
