//! Time-indexed frame history
//!
//! Frames are appended at the tail and trimmed at the head. Nodes live in an
//! arena addressed by a monotonically increasing [`NodeId`]; the arena only
//! stores the retained window, so `id - base` is the slot index. A `NodeId`
//! held by a cursor never dangles: once its node is trimmed it simply stops
//! resolving, and every lookup treats that as "before the head".

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::{Counter, Gauge};
use parking_lot::Mutex;
use tracing::debug;

use crate::capture::{Frame, SourceId};

/// Stable position of a node in a [`FrameBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Clone)]
struct FrameNode {
    frame: Frame,
    timestamp: Instant,
}

/// Retained window of nodes. Slot `i` holds `NodeId(base + i)`.
#[derive(Default)]
pub struct Arena {
    nodes: VecDeque<FrameNode>,
    base: u64,
}

impl Arena {
    fn slot(&self, id: NodeId) -> Option<&FrameNode> {
        let offset = id.0.checked_sub(self.base)?;
        self.nodes.get(offset as usize)
    }

    pub fn head(&self) -> Option<NodeId> {
        (!self.nodes.is_empty()).then_some(NodeId(self.base))
    }

    pub fn tail(&self) -> Option<NodeId> {
        (!self.nodes.is_empty()).then(|| NodeId(self.base + self.nodes.len() as u64 - 1))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `id` is still retained.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    /// Successor of `id`, if both are retained.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        let next = NodeId(id.0 + 1);
        self.contains(next).then_some(next)
    }

    pub fn timestamp(&self, id: NodeId) -> Option<Instant> {
        self.slot(id).map(|node| node.timestamp)
    }

    pub fn frame(&self, id: NodeId) -> Option<&Frame> {
        self.slot(id).map(|node| &node.frame)
    }

    fn push(&mut self, frame: Frame, timestamp: Instant) -> NodeId {
        // Keep timestamps non-decreasing even if a caller's clock reading lags
        let timestamp = match self.nodes.back() {
            Some(last) if last.timestamp > timestamp => last.timestamp,
            _ => timestamp,
        };
        self.nodes.push_back(FrameNode { frame, timestamp });
        NodeId(self.base + self.nodes.len() as u64 - 1)
    }

    fn pop(&mut self) -> Option<FrameNode> {
        let node = self.nodes.pop_front()?;
        self.base += 1;
        Some(node)
    }
}

/// Append-at-tail, trim-at-head frame history for one capture source.
///
/// Every operation takes the internal lock once and only splices nodes while
/// holding it.
pub struct FrameBuffer {
    source: SourceId,
    arena: Mutex<Arena>,
    captured: Counter,
    evicted: Counter,
    retained: Gauge,
}

impl FrameBuffer {
    pub fn new(source: SourceId) -> Self {
        let label = source.to_string();
        Self {
            source,
            arena: Mutex::new(Arena::default()),
            captured: metrics::counter!("frames_captured", "source" => label.clone()),
            evicted: metrics::counter!("frames_evicted", "source" => label.clone()),
            retained: metrics::gauge!("frame_buffer_len", "source" => label),
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn append(&self, frame: Frame, timestamp: Instant) -> NodeId {
        let (id, len) = {
            let mut arena = self.arena.lock();
            (arena.push(frame, timestamp), arena.len())
        };
        self.captured.increment(1);
        self.retained.set(len as f64);
        id
    }

    /// Removes the oldest node. An empty buffer is a no-op.
    pub fn remove_oldest(&self) -> Option<Frame> {
        let (node, len) = {
            let mut arena = self.arena.lock();
            (arena.pop(), arena.len())
        };
        let node = node?;
        self.evicted.increment(1);
        self.retained.set(len as f64);
        Some(node.frame)
    }

    pub fn head(&self) -> Option<NodeId> {
        self.arena.lock().head()
    }

    pub fn tail(&self) -> Option<NodeId> {
        self.arena.lock().tail()
    }

    pub fn len(&self) -> usize {
        self.arena.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.lock().is_empty()
    }

    /// Frame and timestamp at `id`, if still retained.
    pub fn get(&self, id: NodeId) -> Option<(Frame, Instant)> {
        let arena = self.arena.lock();
        let node = arena.slot(id)?;
        Some((node.frame.clone(), node.timestamp))
    }

    /// Runs `f` against a consistent view of the retained nodes.
    pub fn read<R>(&self, f: impl FnOnce(&Arena) -> R) -> R {
        f(&self.arena.lock())
    }

    /// Trims the head up to, but not including, `watermark`.
    ///
    /// Returns the number of nodes removed.
    pub fn evict_before(&self, watermark: NodeId) -> usize {
        let mut arena = self.arena.lock();
        let mut removed = 0;
        while arena.head().is_some_and(|head| head < watermark) {
            arena.pop();
            removed += 1;
        }
        let len = arena.len();
        drop(arena);

        if removed > 0 {
            debug!(source = %self.source, removed, len, "evicted frames");
            self.evicted.increment(removed as u64);
        }
        self.retained.set(len as f64);
        removed
    }

    /// Timestamps from head to tail.
    pub fn timestamps(&self) -> Vec<Instant> {
        self.arena.lock().nodes.iter().map(|n| n.timestamp).collect()
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.arena.lock();
        f.debug_struct("FrameBuffer")
            .field("source", &self.source)
            .field("head", &arena.head())
            .field("tail", &arena.tail())
            .field("len", &arena.len())
            .finish()
    }
}

struct SourceEntry {
    buffer: Arc<FrameBuffer>,
    native_rate: f64,
}

/// One [`FrameBuffer`] per capture source, fixed at start-up.
#[derive(Default)]
pub struct FrameStore {
    sources: BTreeMap<SourceId, SourceEntry>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: SourceId, native_rate: f64) -> Arc<FrameBuffer> {
        self.sources
            .entry(source)
            .or_insert_with(|| SourceEntry {
                buffer: Arc::new(FrameBuffer::new(source)),
                native_rate,
            })
            .buffer
            .clone()
    }

    pub fn buffer(&self, source: SourceId) -> Option<&Arc<FrameBuffer>> {
        self.sources.get(&source).map(|entry| &entry.buffer)
    }

    pub fn native_rate(&self, source: SourceId) -> Option<f64> {
        self.sources.get(&source).map(|entry| entry.native_rate)
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources.keys().copied()
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Arc<FrameBuffer>> + '_ {
        self.sources.values().map(|entry| &entry.buffer)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
