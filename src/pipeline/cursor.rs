//! Per-viewer delay tracking
//!
//! A cursor walks forward through a [`FrameBuffer`] so that it always rests
//! on the node whose timestamp is nearest to `now - delay`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::buffer::{Arena, FrameBuffer, NodeId};

const UNSET: u64 = u64::MAX;

/// Non-owning, forward-only position in a [`FrameBuffer`].
#[derive(Debug)]
pub struct Cursor {
    position: AtomicU64,
}

impl Cursor {
    pub fn unset() -> Self {
        Self {
            position: AtomicU64::new(UNSET),
        }
    }

    pub fn at(id: NodeId) -> Self {
        Self {
            position: AtomicU64::new(id.0),
        }
    }

    pub fn position(&self) -> Option<NodeId> {
        match self.position.load(Ordering::Acquire) {
            UNSET => None,
            id => Some(NodeId(id)),
        }
    }

    /// Re-evaluates the cursor against `now` and returns the new position.
    ///
    /// An empty buffer leaves the cursor where it was.
    pub fn advance(&self, buffer: &FrameBuffer, now: Instant, delay: Duration) -> Option<NodeId> {
        let from = self.position();
        let next = buffer.read(|arena| track(arena, from, now, delay));
        if let Some(id) = next {
            // Only ever forward, even if another updater raced us
            let _ = self
                .position
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current == UNSET || id.0 > current).then_some(id.0)
                });
        }
        self.position()
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::unset()
    }
}

/// Forward walk towards the node nearest to `now - delay`.
///
/// Steps while the current node is older than the target (`ts + delay < now`)
/// and a successor exists, then takes one more step if the successor is
/// strictly closer. The result is never before `from` and never past the
/// tail. A `from` that was trimmed (or never set) restarts at the head.
pub fn track(arena: &Arena, from: Option<NodeId>, now: Instant, delay: Duration) -> Option<NodeId> {
    let mut at = match from {
        Some(id) if arena.contains(id) => id,
        _ => arena.head()?,
    };

    while let Some(next) = arena.next(at) {
        match arena.timestamp(at) {
            Some(ts) if ts + delay < now => at = next,
            _ => break,
        }
    }

    if let Some(next) = arena.next(at) {
        let here = arena.timestamp(at).map(|ts| delay_error(now, ts, delay));
        let there = arena.timestamp(next).map(|ts| delay_error(now, ts, delay));
        if let (Some(here), Some(there)) = (here, there) {
            if here > there {
                at = next;
            }
        }
    }

    Some(at)
}

/// `|delay - (now - timestamp)|` in nanoseconds.
fn delay_error(now: Instant, timestamp: Instant, delay: Duration) -> u128 {
    let realized = now.saturating_duration_since(timestamp).as_nanos();
    realized.abs_diff(delay.as_nanos())
}
