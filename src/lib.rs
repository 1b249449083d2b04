//! Live video time-delay mirror.
//!
//! Captured frames are kept in a time-indexed buffer per camera. Any number
//! of viewers each watch the stream shifted by their own delay, refreshed at
//! their own rate. Capture, cursor advancement, rendering and eviction run as
//! independent loops sharing that buffer.

pub mod capture;
pub mod clock;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod setup;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{CaptureSource, Frame, SourceId};
pub use error::{CaptureError, ConfigError, PersistError, RenderError};
pub use pipeline::{Mirror, Shutdown, ShutdownReason, ViewerRegistry};

/// Prefix for environment overrides, e.g. `CHRONOMIRROR__CAPTURE__FPS=60`
pub const ENV_PREFIX: &str = "CHRONOMIRROR";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
    pub output: OutputConfig,
    pub stats: StatsConfig,
    /// Viewers used when the start-up prompts are skipped
    pub viewers: Vec<ViewerSpec>,
}

impl Config {
    /// Optional TOML file, overlaid by environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Missing keys fall back to the serde defaults above
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let loaded = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Rejects values the loops cannot turn into a period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fps = self.capture.fps;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(ConfigError::NonPositiveRate(fps));
        }
        let interval = self.pipeline.cursor_update_interval_ms;
        if !interval.is_finite() || interval <= 0.0 {
            return Err(ConfigError::InvalidInterval("pipeline.cursor_update_interval_ms", interval));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// The paced loop reads the camera itself
    Direct,
    /// A separate thread reads the camera into a single-slot mailbox; the
    /// paced loop appends the latest frame, repeating it if nothing new came
    Decoupled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device paths; empty means auto-detect
    pub devices: Vec<String>,
    /// Number of synthetic sources used with `--pattern`
    pub pattern_sources: u32,
    pub width: u32,
    pub height: u32,
    /// Requested camera rate, also the rate of the synthetic source
    pub fps: f64,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub mode: CaptureMode,
    /// Rate at which frames are appended to the buffer; defaults to the
    /// camera's native rate
    pub pace_fps: Option<f64>,
    /// CPU cores to pin capture threads to, one per source in order
    pub pin_cores: Vec<usize>,
}

impl CaptureConfig {
    pub fn pace_interval(&self, native_rate: f64) -> Duration {
        let rate = self.pace_fps.filter(|r| *r > 0.0).unwrap_or(native_rate);
        Duration::from_secs_f64(1.0 / rate.max(f64::EPSILON))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            pattern_sources: 1,
            width: 640,
            height: 480,
            fps: 30.0,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            mode: CaptureMode::Direct,
            pace_fps: None,
            pin_cores: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cursor_update_interval_ms: f64,
    pub eviction_interval_ms: u64,
    /// Advance cursors inside the render loop instead of a dedicated thread
    pub inline_cursor_update: bool,
    /// Spin the last part of every paced wait for sub-millisecond accuracy
    pub spin_wait: bool,
    pub sleep_fraction: f64,
    /// Accept viewer edits on stdin while running
    pub live: bool,
}

impl PipelineConfig {
    pub fn cursor_update_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.cursor_update_interval_ms.max(0.01) / 1000.0)
            .unwrap_or(Duration::from_millis(1))
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms.max(1))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cursor_update_interval_ms: 1.0,
            eviction_interval_ms: 1000,
            inline_cursor_update: false,
            spin_wait: true,
            sleep_fraction: pipeline::pacing::DEFAULT_SLEEP_FRACTION,
            live: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub headless: bool,
    pub vsync: bool,
    /// Key poll wait of the headless surface
    pub idle_poll_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            headless: false,
            vsync: false,
            idle_poll_ms: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub snapshot_prefix: String,
    pub diagnostics_file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            snapshot_prefix: "combined_screenshot".into(),
            diagnostics_file: PathBuf::from("display_time_differences.txt"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
    pub sample_min_us: u64,
    pub sample_max_us: u64,
    /// Stop the mirror once this many samples were taken
    pub max_samples: Option<usize>,
    pub summary_file: PathBuf,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_min_us: 50,
            sample_max_us: 10_000,
            max_samples: None,
            summary_file: PathBuf::from("Collected_data.txt"),
        }
    }
}

/// Unvalidated viewer entry, as written in a config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewerSpec {
    /// Seconds
    pub delay: f64,
    pub fps: f64,
    #[serde(default)]
    pub source: SourceId,
}
