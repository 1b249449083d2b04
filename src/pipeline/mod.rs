//! Frame history, viewers and the loops that share them

pub mod buffer;
pub mod capture_loop;
pub mod cursor;
pub mod cursor_loop;
pub mod eviction;
pub mod mirror;
pub mod pacing;
pub mod render_loop;
pub mod shutdown;
pub mod stats;
pub mod viewer;

pub use buffer::{FrameBuffer, FrameStore, NodeId};
pub use capture_loop::{capture_once, CaptureLoop};
pub use cursor::{track, Cursor};
pub use cursor_loop::{run_cursor_loop, update_cursors};
pub use eviction::{evict_all, run_eviction_loop};
pub use mirror::{Mirror, MirrorOutcome};
pub use pacing::{Pacer, Tick};
pub use render_loop::{apply_command, RenderLoop};
pub use shutdown::{watch_ctrl_c, Shutdown, ShutdownReason};
pub use stats::{write_stats, DelayStats, StatsLoop};
pub use viewer::{Viewer, ViewerId, ViewerRegistry, ViewerSettings};
