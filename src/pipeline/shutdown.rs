//! Shared stop signal observed at the top of every loop

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::capture::SourceId;

/// Why the mirror stopped. Only the first reason is kept.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// `q` pressed, window closed or `quit` typed on the console
    UserQuit,
    /// Ctrl-C
    Signal,
    /// The delay statistics loop collected its sample budget
    SampleLimit,
    CaptureFailed { source: SourceId, error: String },
    RenderFailed(String),
    /// A loop thread could not be started
    ThreadSpawn(String),
    /// A loop thread unwound
    LoopPanicked(String),
}

impl ShutdownReason {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShutdownReason::CaptureFailed { .. }
                | ShutdownReason::RenderFailed(_)
                | ShutdownReason::ThreadSpawn(_)
                | ShutdownReason::LoopPanicked(_)
        )
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::UserQuit => write!(f, "quit requested"),
            ShutdownReason::Signal => write!(f, "interrupted"),
            ShutdownReason::SampleLimit => write!(f, "delay sample limit reached"),
            ShutdownReason::CaptureFailed { source, error } => {
                write!(f, "unable to read frame from camera {source}: {error}")
            }
            ShutdownReason::RenderFailed(error) => write!(f, "display failed: {error}"),
            ShutdownReason::ThreadSpawn(error) => write!(f, "unable to start loop thread: {error}"),
            ShutdownReason::LoopPanicked(name) => write!(f, "{name} loop panicked"),
        }
    }
}

#[derive(Default)]
struct Inner {
    stop: AtomicBool,
    reason: Mutex<Option<ShutdownReason>>,
}

/// Cloneable handle to the process-wide stop flag.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, reason: ShutdownReason) {
        let mut slot = self.inner.reason.lock();
        if slot.is_none() {
            if reason.is_fatal() {
                warn!(%reason, "shutting down");
            } else {
                info!(%reason, "shutting down");
            }
            *slot = Some(reason);
        }
        self.inner.stop.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.inner.reason.lock().clone()
    }

    /// Hold for the lifetime of a loop: if the loop unwinds, every other
    /// loop is told to stop.
    pub fn guard<'a>(&'a self, name: &'a str) -> PanicGuard<'a> {
        PanicGuard {
            shutdown: self,
            name,
        }
    }
}

pub struct PanicGuard<'a> {
    shutdown: &'a Shutdown,
    name: &'a str,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(loop_name = self.name, "loop panicked");
            self.shutdown
                .trigger(ShutdownReason::LoopPanicked(self.name.to_string()));
        }
    }
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Trips `shutdown` on Ctrl-C from a detached watcher thread.
pub fn watch_ctrl_c(shutdown: Shutdown) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => shutdown.trigger(ShutdownReason::Signal),
                    Err(e) => warn!("Ctrl-C handler unavailable: {}", e),
                }
            });
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let observer = shutdown.clone();
        shutdown.trigger(ShutdownReason::CaptureFailed {
            source: SourceId(1),
            error: "gone".into(),
        });
        shutdown.trigger(ShutdownReason::UserQuit);

        assert!(observer.is_triggered());
        let reason = observer.reason().unwrap();
        assert!(reason.is_fatal());
        assert_eq!(
            reason.to_string(),
            "unable to read frame from camera 1: gone"
        );
    }

    #[test]
    fn panicking_loop_trips_shutdown() {
        let shutdown = Shutdown::new();
        let worker = shutdown.clone();
        let joined = std::thread::spawn(move || {
            let _guard = worker.guard("worker");
            panic!("boom");
        })
        .join();

        assert!(joined.is_err());
        assert_eq!(
            shutdown.reason(),
            Some(ShutdownReason::LoopPanicked("worker".into()))
        );
        assert!(shutdown.reason().is_some_and(|r| r.is_fatal()));

        // A guard dropped normally leaves the flag alone
        let calm = Shutdown::new();
        drop(calm.guard("calm"));
        assert!(!calm.is_triggered());
    }
}
