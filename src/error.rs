use std::path::PathBuf;

use thiserror::Error;

use crate::capture::SourceId;
use crate::pipeline::ViewerId;

/// Failure of a capture collaborator. Fatal for the source that raised it.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera {0} stopped delivering frames")]
    SourceLost(SourceId),

    #[error("capture device error: {0}")]
    Device(String),

    #[error("capture stream not started")]
    NotStarted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("jpeg decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    #[error("jpeg header missing after decode")]
    MissingJpegHeader,

    #[error("jpeg decoded to unsupported pixel layout {0:?}")]
    JpegLayout(jpeg_decoder::PixelFormat),

    #[error("frame data truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render backend: {0}")]
    Backend(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("no frames to save")]
    Empty,

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Rejected configuration input. Never reaches the loops; callers re-prompt
/// or report and carry on.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("`{0}` is not a number")]
    NotANumber(String),

    #[error("delay must be a non-negative value, got {0}")]
    NegativeDelay(f64),

    #[error("frame rate must be a positive value, got {0}")]
    NonPositiveRate(f64),

    #[error("delay must be at most {max}s, got {requested}s")]
    DelayTooLong { requested: f64, max: u64 },

    #[error("frame rate must be at least one frame every {max}s, got {requested} fps")]
    RateTooLow { requested: f64, max: u64 },

    #[error("frame rate must not exceed {native} fps, got {requested}")]
    RateAboveNative { requested: f64, native: f64 },

    #[error("{0} must be a positive number of milliseconds, got {1}")]
    InvalidInterval(&'static str, f64),

    #[error("{0} must be a positive integer")]
    NonPositive(&'static str),

    #[error("unknown camera {0}")]
    UnknownSource(SourceId),

    #[error("unknown viewer {0}")]
    UnknownViewer(ViewerId),

    #[error("unrecognised command `{0}`")]
    UnknownCommand(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}
