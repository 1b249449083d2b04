//! Viewers and the live viewer list

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::buffer::{FrameBuffer, FrameStore, NodeId};
use super::cursor::Cursor;
use crate::capture::{Frame, SourceId};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewerId(pub u32);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated viewer parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerSettings {
    pub delay: Duration,
    pub refresh_period: Duration,
    pub source: SourceId,
}

impl ViewerSettings {
    pub fn new(delay: Duration, rate: f64, source: SourceId) -> Self {
        Self {
            delay,
            refresh_period: refresh_period(rate),
            source,
        }
    }
}

/// Longest delay or refresh period a viewer accepts.
pub const MAX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// `1 / rate`, saturating at [`MAX_PERIOD`] for rates too small to represent.
pub fn refresh_period(rate: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / rate)
        .map_or(MAX_PERIOD, |period| period.min(MAX_PERIOD))
}

fn check_bounds(delay: Duration, period: Duration) -> Result<(), ConfigError> {
    if delay > MAX_PERIOD {
        return Err(ConfigError::DelayTooLong {
            requested: delay.as_secs_f64(),
            max: MAX_PERIOD.as_secs(),
        });
    }
    if period > MAX_PERIOD {
        return Err(ConfigError::RateTooLow {
            requested: 1.0 / period.as_secs_f64(),
            max: MAX_PERIOD.as_secs(),
        });
    }
    Ok(())
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// An independent consumer of one capture stream, shifted by its own delay.
#[derive(Debug)]
pub struct Viewer {
    id: ViewerId,
    source: SourceId,
    delay_ns: AtomicU64,
    refresh_ns: AtomicU64,
    cursor: Cursor,
}

impl Viewer {
    pub fn new(id: ViewerId, settings: ViewerSettings, cursor: Cursor) -> Self {
        Self {
            id,
            source: settings.source,
            delay_ns: AtomicU64::new(nanos(settings.delay)),
            refresh_ns: AtomicU64::new(nanos(settings.refresh_period)),
            cursor,
        }
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn delay(&self) -> Duration {
        Duration::from_nanos(self.delay_ns.load(Ordering::Relaxed))
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_nanos(self.refresh_ns.load(Ordering::Relaxed))
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Window label, e.g. `Display 1.5s delay (Camera 0)`.
    pub fn label(&self, multi_source: bool) -> String {
        let delay = format_secs(self.delay());
        if multi_source {
            format!("Display {delay}s delay (Camera {})", self.source)
        } else {
            format!("Display {delay}s delay")
        }
    }

    /// Runs one delay-tracking step against `buffer`.
    pub fn advance(&self, buffer: &FrameBuffer, now: Instant) -> Option<NodeId> {
        self.cursor.advance(buffer, now, self.delay())
    }

    /// Frame under the cursor. Falls back to the head if the cursor has not
    /// landed yet.
    pub fn current(&self, buffer: &FrameBuffer) -> Option<(Frame, Instant)> {
        match self.cursor.position() {
            Some(id) => buffer.get(id).or_else(|| buffer.head().and_then(|h| buffer.get(h))),
            None => buffer.head().and_then(|h| buffer.get(h)),
        }
    }

    /// `now - cursor.timestamp`: the delay this viewer is actually showing.
    pub fn realized_delay(&self, buffer: &FrameBuffer, now: Instant) -> Option<Duration> {
        self.current(buffer)
            .map(|(_, timestamp)| now.saturating_duration_since(timestamp))
    }

    fn set_delay(&self, delay: Duration) {
        self.delay_ns.store(nanos(delay), Ordering::Relaxed);
    }

    fn set_refresh_period(&self, period: Duration) {
        self.refresh_ns.store(nanos(period), Ordering::Relaxed);
    }
}

/// Trims `0.500000` style output to `0.5`.
pub fn format_secs(duration: Duration) -> String {
    let text = format!("{:.3}", duration.as_secs_f64());
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() {
        "0".to_string()
    } else {
        text.to_string()
    }
}

pub type ViewerList = Arc<Vec<Arc<Viewer>>>;

/// Copy-on-write list of viewers.
///
/// Readers take lock-free snapshots. Structural edits and eviction serialise
/// on `edit`, so a freshly added cursor can never be trimmed out from under
/// it.
pub struct ViewerRegistry {
    viewers: ArcSwap<Vec<Arc<Viewer>>>,
    edit: Mutex<()>,
    next_id: AtomicU32,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self {
            viewers: ArcSwap::from_pointee(Vec::new()),
            edit: Mutex::new(()),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn snapshot(&self) -> ViewerList {
        self.viewers.load_full()
    }

    pub fn len(&self) -> usize {
        self.viewers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.load().is_empty()
    }

    pub fn get(&self, id: ViewerId) -> Option<Arc<Viewer>> {
        self.viewers.load().iter().find(|v| v.id == id).cloned()
    }

    /// Adds a viewer whose cursor starts at the oldest retained frame of
    /// its source. Delays and periods above [`MAX_PERIOD`] are refused.
    pub fn add(&self, settings: ViewerSettings, store: &FrameStore) -> Result<ViewerId, ConfigError> {
        check_bounds(settings.delay, settings.refresh_period)?;
        let buffer = store
            .buffer(settings.source)
            .ok_or(ConfigError::UnknownSource(settings.source))?;

        let _edit = self.edit.lock();
        let id = ViewerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cursor = buffer.head().map(Cursor::at).unwrap_or_default();
        let viewer = Arc::new(Viewer::new(id, settings, cursor));

        let mut next = Vec::clone(&self.viewers.load());
        next.push(viewer);
        // Slowest viewer last
        next.sort_by_key(|v| v.delay());
        self.viewers.store(Arc::new(next));

        info!(
            viewer = %id,
            source = %settings.source,
            delay_s = settings.delay.as_secs_f64(),
            fps = 1.0 / settings.refresh_period.as_secs_f64(),
            "viewer added"
        );
        Ok(id)
    }

    pub fn remove(&self, id: ViewerId) -> Result<Arc<Viewer>, ConfigError> {
        let _edit = self.edit.lock();
        let current = self.viewers.load();
        let removed = current
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or(ConfigError::UnknownViewer(id))?;
        let next: Vec<_> = current.iter().filter(|v| v.id != id).cloned().collect();
        self.viewers.store(Arc::new(next));

        info!(viewer = %id, "viewer removed");
        Ok(removed)
    }

    pub fn set_delay(&self, id: ViewerId, delay: Duration) -> Result<(), ConfigError> {
        check_bounds(delay, Duration::from_secs(1))?;
        let _edit = self.edit.lock();
        let current = self.viewers.load();
        let viewer = current
            .iter()
            .find(|v| v.id == id)
            .ok_or(ConfigError::UnknownViewer(id))?;
        viewer.set_delay(delay);

        let mut next = Vec::clone(&current);
        next.sort_by_key(|v| v.delay());
        self.viewers.store(Arc::new(next));

        info!(viewer = %id, delay_s = delay.as_secs_f64(), "viewer delay changed");
        Ok(())
    }

    pub fn set_refresh_period(&self, id: ViewerId, period: Duration) -> Result<(), ConfigError> {
        check_bounds(Duration::ZERO, period)?;
        let viewer = self.get(id).ok_or(ConfigError::UnknownViewer(id))?;
        viewer.set_refresh_period(period);
        info!(viewer = %id, fps = 1.0 / period.as_secs_f64(), "viewer frame rate changed");
        Ok(())
    }

    /// Trims `buffer` up to the oldest cursor bound to it.
    ///
    /// Without any viewer on the source only the newest frame is kept. A
    /// viewer whose cursor has not landed yet blocks eviction entirely.
    pub fn evict(&self, buffer: &FrameBuffer) -> usize {
        let _edit = self.edit.lock();
        let viewers = self.viewers.load();
        let mut bound = viewers.iter().filter(|v| v.source == buffer.source()).peekable();

        let watermark = if bound.peek().is_none() {
            buffer.tail()
        } else {
            let mut lowest: Option<NodeId> = None;
            for viewer in bound {
                match viewer.cursor.position() {
                    Some(id) => lowest = Some(lowest.map_or(id, |low| low.min(id))),
                    None => {
                        debug!(viewer = %viewer.id, "cursor not placed yet, skipping eviction");
                        return 0;
                    }
                }
            }
            lowest
        };

        watermark.map_or(0, |id| buffer.evict_before(id))
    }

    /// Viewer with the largest delay on `source`.
    pub fn slowest(&self, source: SourceId) -> Option<Arc<Viewer>> {
        self.viewers
            .load()
            .iter()
            .filter(|v| v.source == source)
            .max_by_key(|v| v.delay())
            .cloned()
    }
}

impl Default for ViewerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pipeline::buffer::tests::test_frame;

    fn store_with_frames(clock: &ManualClock, count: usize, step: f64) -> FrameStore {
        let mut store = FrameStore::new();
        let buffer = store.register(SourceId(0), 30.0);
        for i in 0..count {
            buffer.append(test_frame(i as u64), clock.at(i as f64 * step));
        }
        store
    }

    #[test]
    fn labels_follow_delay_and_source() {
        let settings = ViewerSettings::new(Duration::from_millis(1500), 30.0, SourceId(2));
        let viewer = Viewer::new(ViewerId(1), settings, Cursor::unset());
        assert_eq!(viewer.label(false), "Display 1.5s delay");
        assert_eq!(viewer.label(true), "Display 1.5s delay (Camera 2)");
        assert_eq!(format_secs(Duration::ZERO), "0");
        assert_eq!(format_secs(Duration::from_secs(2)), "2");
    }

    #[test]
    fn add_remove_and_modify() {
        let clock = ManualClock::new();
        let store = store_with_frames(&clock, 5, 0.1);
        let registry = ViewerRegistry::new();

        let slow = registry
            .add(ViewerSettings::new(Duration::from_secs(2), 10.0, SourceId(0)), &store)
            .unwrap();
        let fast = registry
            .add(ViewerSettings::new(Duration::from_secs(1), 30.0, SourceId(0)), &store)
            .unwrap();

        // Sorted by delay, slowest last
        let ids: Vec<_> = registry.snapshot().iter().map(|v| v.id()).collect();
        assert_eq!(ids, vec![fast, slow]);

        // New cursors start at the head
        let viewer = registry.get(fast).unwrap();
        assert_eq!(viewer.cursor().position(), Some(NodeId(0)));

        registry.set_delay(fast, Duration::from_secs(3)).unwrap();
        assert_eq!(registry.slowest(SourceId(0)).unwrap().id(), fast);

        registry
            .set_refresh_period(slow, refresh_period(5.0))
            .unwrap();
        let period = registry.get(slow).unwrap().refresh_period();
        assert!((period.as_secs_f64() - 0.2).abs() < 1e-6);

        registry.remove(slow).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            registry.remove(slow),
            Err(ConfigError::UnknownViewer(id)) if id == slow
        ));
        assert!(matches!(
            registry.add(ViewerSettings::new(Duration::ZERO, 1.0, SourceId(9)), &store),
            Err(ConfigError::UnknownSource(SourceId(9)))
        ));
    }

    #[test]
    fn eviction_never_passes_slowest_cursor() {
        let clock = ManualClock::new();
        let store = store_with_frames(&clock, 100, 0.1);
        let buffer = store.buffer(SourceId(0)).unwrap().clone();
        let registry = ViewerRegistry::new();

        for delay in [0.5, 2.0, 1.0] {
            registry
                .add(ViewerSettings::new(Duration::from_secs_f64(delay), 30.0, SourceId(0)), &store)
                .unwrap();
        }

        let now = clock.at(9.9);
        for viewer in registry.snapshot().iter() {
            viewer.advance(&buffer, now);
        }
        let slowest = registry.slowest(SourceId(0)).unwrap();
        let watermark = slowest.cursor().position().unwrap();

        let removed = registry.evict(&buffer);
        assert!(removed > 0);
        assert_eq!(buffer.head(), Some(watermark));
        for viewer in registry.snapshot().iter() {
            assert!(viewer.cursor().position().unwrap() >= buffer.head().unwrap());
        }
    }

    #[test]
    fn eviction_without_viewers_keeps_newest() {
        let clock = ManualClock::new();
        let store = store_with_frames(&clock, 10, 0.1);
        let buffer = store.buffer(SourceId(0)).unwrap().clone();
        let registry = ViewerRegistry::new();

        assert_eq!(registry.evict(&buffer), 9);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.head(), buffer.tail());
    }

    #[test]
    fn unplaced_cursor_blocks_eviction() {
        let mut store = FrameStore::new();
        let buffer = store.register(SourceId(0), 30.0);
        let registry = ViewerRegistry::new();
        registry
            .add(ViewerSettings::new(Duration::from_secs(1), 30.0, SourceId(0)), &store)
            .unwrap();

        for i in 0..5 {
            buffer.append(test_frame(i), std::time::Instant::now());
        }
        assert_eq!(registry.evict(&buffer), 0);
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn realized_delay_reads_cursor_timestamp() {
        let clock = ManualClock::new();
        let store = store_with_frames(&clock, 31, 0.1);
        let buffer = store.buffer(SourceId(0)).unwrap().clone();
        let registry = ViewerRegistry::new();
        let id = registry
            .add(ViewerSettings::new(Duration::from_secs(1), 30.0, SourceId(0)), &store)
            .unwrap();
        let viewer = registry.get(id).unwrap();

        let now = clock.at(3.0);
        viewer.advance(&buffer, now);
        let realized = viewer.realized_delay(&buffer, now).unwrap();
        assert!((realized.as_secs_f64() - 1.0).abs() < 0.051, "realized {realized:?}");
    }

    #[test]
    fn out_of_range_settings_are_refused() {
        let clock = ManualClock::new();
        let store = store_with_frames(&clock, 3, 0.1);
        let registry = ViewerRegistry::new();

        let huge = ViewerSettings::new(Duration::from_secs(100_000_000_000), 30.0, SourceId(0));
        assert!(matches!(
            registry.add(huge, &store),
            Err(ConfigError::DelayTooLong { .. })
        ));
        assert!(registry.is_empty());

        // A vanishing rate saturates instead of panicking, then is refused
        let crawl = ViewerSettings::new(Duration::ZERO, 1e-300, SourceId(0));
        assert_eq!(crawl.refresh_period, MAX_PERIOD);
        assert_eq!(refresh_period(0.0), MAX_PERIOD);

        let id = registry
            .add(ViewerSettings::new(MAX_PERIOD, 30.0, SourceId(0)), &store)
            .unwrap();
        assert_eq!(registry.get(id).unwrap().delay(), MAX_PERIOD);
        assert!(matches!(
            registry.set_delay(id, MAX_PERIOD + Duration::from_secs(1)),
            Err(ConfigError::DelayTooLong { .. })
        ));
        assert_eq!(registry.get(id).unwrap().delay(), MAX_PERIOD);
    }
}
