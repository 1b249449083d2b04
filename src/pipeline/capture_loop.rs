//! Producer loop, one per capture source

use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, info_span, warn};

use super::buffer::{FrameBuffer, NodeId};
use super::pacing::Pacer;
use super::shutdown::{Shutdown, ShutdownReason};
use crate::capture::{CaptureSource, LatestFrame, SourceId};
use crate::clock::Clock;
use crate::error::CaptureError;
use crate::CaptureMode;

/// Acquires one frame and appends it stamped with the current clock reading.
pub fn capture_once<S, C>(source: &mut S, buffer: &FrameBuffer, clock: &C) -> Result<NodeId, CaptureError>
where
    S: CaptureSource + ?Sized,
    C: Clock,
{
    let frame = source.acquire()?;
    Ok(buffer.append(frame, clock.now()))
}

fn source_failed(shutdown: &Shutdown, source: SourceId, e: &CaptureError) {
    error!(%source, "Unable to read frame: {}", e);
    shutdown.trigger(ShutdownReason::CaptureFailed {
        source,
        error: e.to_string(),
    });
}

fn pin_current(core: Option<usize>) {
    let Some(id) = core else {
        return;
    };
    if core_affinity::set_for_current(core_affinity::CoreId { id }) {
        debug!(core = id, "capture thread pinned");
    } else {
        warn!(core = id, "unable to pin capture thread");
    }
}

pub struct CaptureLoop<S, C> {
    source: S,
    buffer: Arc<FrameBuffer>,
    pacer: Pacer<C>,
    mode: CaptureMode,
    core: Option<usize>,
}

impl<S, C> CaptureLoop<S, C>
where
    S: CaptureSource,
    C: Clock + Clone,
{
    pub fn new(source: S, buffer: Arc<FrameBuffer>, pacer: Pacer<C>) -> Self {
        Self {
            source,
            buffer,
            pacer,
            mode: CaptureMode::Direct,
            core: None,
        }
    }

    pub fn with_mode(mut self, mode: CaptureMode) -> Self {
        self.mode = mode;
        self
    }

    /// Pin the loop's threads to `core`.
    pub fn pin_to(mut self, core: Option<usize>) -> Self {
        self.core = core;
        self
    }

    pub fn source_id(&self) -> SourceId {
        self.source.id()
    }

    /// Runs until `shutdown` trips, then releases the source and hands it
    /// back.
    pub fn run(mut self, shutdown: &Shutdown) -> S {
        let id = self.source.id();
        let _span = info_span!("capture", source = %id).entered();
        pin_current(self.core);
        info!(
            mode = ?self.mode,
            interval_ms = self.pacer.interval().as_secs_f64() * 1e3,
            "capture loop started"
        );

        match self.mode {
            CaptureMode::Direct => self.run_direct(shutdown),
            CaptureMode::Decoupled => self.run_decoupled(shutdown),
        }

        self.source.release();
        info!(frames = self.buffer.len(), "capture loop stopped");
        self.source
    }

    fn run_direct(&mut self, shutdown: &Shutdown) {
        let Self {
            source,
            buffer,
            pacer,
            ..
        } = self;
        let buffer: &FrameBuffer = buffer;
        let clock = pacer.clock().clone();
        let id = source.id();

        pacer.run(shutdown, |_| match capture_once(&mut *source, buffer, &clock) {
            Ok(_) => ControlFlow::Continue(()),
            Err(e) => {
                source_failed(shutdown, id, &e);
                ControlFlow::Break(())
            }
        });
    }

    /// Acquisition on its own thread, appending on the paced one. When the
    /// camera falls behind the pace the last frame is appended again.
    fn run_decoupled(&mut self, shutdown: &Shutdown) {
        let Self {
            source,
            buffer,
            pacer,
            core,
            ..
        } = self;
        let clock = pacer.clock().clone();
        let id = source.id();
        let core = *core;
        let mailbox = LatestFrame::new();
        let name = format!("acquire-{id}");

        thread::scope(|scope| {
            let acquisition = thread::Builder::new()
                .name(name.clone())
                .spawn_scoped(scope, || {
                    let _guard = shutdown.guard(&name);
                    pin_current(core);
                    while !shutdown.is_triggered() {
                        match source.acquire() {
                            Ok(frame) => mailbox.post(frame),
                            Err(e) => {
                                source_failed(shutdown, id, &e);
                                break;
                            }
                        }
                    }
                    debug!(source = %id, "acquisition thread stopped");
                });
            if let Err(e) = acquisition {
                source_failed(shutdown, id, &CaptureError::Io(e));
                return;
            }

            let source_label = id.to_string();
            pacer.run(shutdown, |_| {
                if let Some((frame, fresh)) = mailbox.take_or_repeat() {
                    if !fresh {
                        metrics::counter!("frames_repeated", "source" => source_label.clone())
                            .increment(1);
                    }
                    buffer.append(frame, clock.now());
                }
                ControlFlow::Continue(())
            });
        });
    }
}
