//! Periodic cursor advancement, decoupled from render cadence

use std::ops::ControlFlow;
use std::time::Instant;

use tracing::{info, instrument};

use super::buffer::FrameStore;
use super::pacing::Pacer;
use super::shutdown::Shutdown;
use super::viewer::ViewerRegistry;
use crate::clock::Clock;

/// One delay-tracking step for every viewer against its own source.
pub fn update_cursors(registry: &ViewerRegistry, store: &FrameStore, now: Instant) {
    for viewer in registry.snapshot().iter() {
        if let Some(buffer) = store.buffer(viewer.source()) {
            viewer.advance(buffer, now);
        }
    }
}

#[instrument(name = "cursor_update", skip_all)]
pub fn run_cursor_loop<C: Clock>(
    registry: &ViewerRegistry,
    store: &FrameStore,
    mut pacer: Pacer<C>,
    shutdown: &Shutdown,
) {
    info!(
        interval_ms = pacer.interval().as_secs_f64() * 1e3,
        "cursor update loop started"
    );
    pacer.run(shutdown, |now| {
        update_cursors(registry, store, now);
        ControlFlow::Continue(())
    });
    info!("cursor update loop stopped");
}
