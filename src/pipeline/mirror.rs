//! Top-level orchestration
//!
//! Owns the frame store, the viewer registry and the shutdown handle for the
//! lifetime of one run. Capture, cursor update, eviction and the optional
//! statistics loop each get a named thread; rendering stays on the calling
//! thread since windowing backends want their main thread.

use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;

use flume::Receiver;
use tracing::{error, info, warn};

use super::buffer::FrameStore;
use super::capture_loop::CaptureLoop;
use super::cursor_loop::run_cursor_loop;
use super::eviction::run_eviction_loop;
use super::pacing::Pacer;
use super::render_loop::RenderLoop;
use super::shutdown::{Shutdown, ShutdownReason};
use super::stats::{write_stats, DelayStats, StatsLoop};
use super::viewer::{ViewerId, ViewerRegistry, ViewerSettings};
use crate::capture::CaptureSource;
use crate::clock::Clock;
use crate::display::{Persistence, RenderSurface};
use crate::error::ConfigError;
use crate::setup::ViewerCommand;
use crate::Config;

/// What a finished run hands back.
pub struct MirrorOutcome<R, P> {
    /// First reason the mirror stopped for
    pub reason: Option<ShutdownReason>,
    pub surface: R,
    pub persist: P,
    pub stats: Vec<DelayStats>,
}

pub struct Mirror<C> {
    config: Config,
    clock: C,
    sources: Vec<Box<dyn CaptureSource>>,
    store: Arc<FrameStore>,
    registry: ViewerRegistry,
    shutdown: Shutdown,
    commands: Option<Receiver<ViewerCommand>>,
}

fn spawn_loop<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    name: String,
    shutdown: &Shutdown,
    f: F,
) -> Option<ScopedJoinHandle<'scope, T>>
where
    T: Send + 'scope,
    F: FnOnce() -> T + Send + 'scope,
{
    let watcher = shutdown.clone();
    let loop_name = name.clone();
    let body = move || {
        let _guard = watcher.guard(&loop_name);
        f()
    };
    match thread::Builder::new().name(name.clone()).spawn_scoped(scope, body) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Failed to spawn {}: {}", name, e);
            shutdown.trigger(ShutdownReason::ThreadSpawn(format!("{name}: {e}")));
            None
        }
    }
}

fn join_loop<T>(handle: ScopedJoinHandle<'_, T>) -> Option<T> {
    let name = handle.thread().name().unwrap_or("loop").to_string();
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            error!("{} thread panicked", name);
            None
        }
    }
}

impl<C: Clock + Clone> Mirror<C> {
    /// Registers one frame buffer per source.
    pub fn new(config: Config, clock: C, sources: Vec<Box<dyn CaptureSource>>) -> Self {
        let mut store = FrameStore::new();
        for source in &sources {
            store.register(source.id(), source.native_rate());
        }
        Self {
            config,
            clock,
            sources,
            store: Arc::new(store),
            registry: ViewerRegistry::new(),
            shutdown: Shutdown::new(),
            commands: None,
        }
    }

    /// Share an existing shutdown handle, e.g. one already wired to Ctrl-C.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Live edits, applied by the render loop.
    pub fn with_commands(mut self, commands: Receiver<ViewerCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub fn registry(&self) -> &ViewerRegistry {
        &self.registry
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn add_viewer(&self, settings: ViewerSettings) -> Result<ViewerId, ConfigError> {
        self.registry.add(settings, &self.store)
    }

    fn pacer(&self, interval: Duration) -> Pacer<C> {
        Pacer::new(self.clock.clone(), interval)
            .with_spin(self.config.pipeline.spin_wait)
            .with_sleep_fraction(self.config.pipeline.sleep_fraction)
    }

    /// Runs every loop until shutdown, then releases sources, closes all
    /// windows and flushes delay statistics.
    pub fn run<R, P>(mut self, surface: R, persist: P) -> MirrorOutcome<R, P>
    where
        R: RenderSurface,
        P: Persistence,
    {
        let sources = std::mem::take(&mut self.sources);
        let captures: Vec<_> = sources
            .into_iter()
            .enumerate()
            .filter_map(|(i, source)| {
                let buffer = self.store.buffer(source.id())?.clone();
                let interval = self.config.capture.pace_interval(source.native_rate());
                let pacer = self.pacer(interval);
                Some(
                    CaptureLoop::new(source, buffer, pacer)
                        .with_mode(self.config.capture.mode)
                        .pin_to(self.config.capture.pin_cores.get(i).copied()),
                )
            })
            .collect();
        let cursor_pacer = (!self.config.pipeline.inline_cursor_update)
            .then(|| self.pacer(self.config.pipeline.cursor_update_interval()));
        let eviction_pacer = self.pacer(self.config.pipeline.eviction_interval());

        let Self {
            config,
            clock,
            store,
            registry,
            shutdown,
            commands,
            ..
        } = self;
        let (store, registry, shutdown) = (&*store, &registry, &shutdown);

        let mut render = RenderLoop::new(
            registry,
            store,
            surface,
            persist,
            clock.clone(),
            config.output.clone(),
        )
        .with_inline_cursor_update(config.pipeline.inline_cursor_update)
        .with_idle(Duration::from_millis(config.display.idle_poll_ms));
        if let Some(commands) = commands {
            render = render.with_commands(commands);
        }

        info!(
            sources = store.len(),
            viewers = registry.len(),
            mode = ?config.capture.mode,
            "mirror starting"
        );

        let stats = thread::scope(|scope| {
            let mut loops = Vec::new();
            for capture in captures {
                let name = format!("capture-{}", capture.source_id());
                loops.extend(spawn_loop(scope, name, shutdown, move || {
                    drop(capture.run(shutdown));
                }));
            }
            if let Some(pacer) = cursor_pacer {
                loops.extend(spawn_loop(scope, "cursor-update".into(), shutdown, move || {
                    run_cursor_loop(registry, store, pacer, shutdown)
                }));
            }
            loops.extend(spawn_loop(scope, "eviction".into(), shutdown, move || {
                run_eviction_loop(registry, store, eviction_pacer, shutdown)
            }));
            let stats_loop = config.stats.enabled.then(|| {
                let stats = StatsLoop::new(registry, store, clock.clone(), &config.stats);
                spawn_loop(scope, "delay-stats".into(), shutdown, move || stats.run(shutdown))
            });

            {
                let _guard = shutdown.guard("render");
                render.run(shutdown);
            }

            for handle in loops {
                join_loop(handle);
            }
            stats_loop
                .flatten()
                .and_then(join_loop)
                .unwrap_or_default()
        });

        let (mut surface, mut persist) = render.into_parts();
        surface.close_all();
        if let Err(e) = write_stats(&mut persist, &config.stats.summary_file, &stats) {
            warn!("Failed to save delay statistics: {}", e);
        }

        let reason = shutdown.reason();
        match &reason {
            Some(reason) if reason.is_fatal() => error!(%reason, "mirror stopped"),
            Some(reason) => info!(%reason, "mirror stopped"),
            None => info!("mirror stopped"),
        }

        MirrorOutcome {
            reason,
            surface,
            persist,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, PatternSource, SourceId};
    use crate::error::CaptureError;
    use crate::clock::MonotonicClock;
    use crate::display::{FsPersistence, HeadlessSurface};

    fn config() -> Config {
        let mut config = Config::default();
        config.pipeline.spin_wait = false;
        config.pipeline.eviction_interval_ms = 20;
        config
    }

    #[test]
    fn capture_failure_stops_every_loop() {
        let source = PatternSource::new(SourceId(0), 16, 8, 100.0).fail_after(20);
        let mirror = Mirror::new(config(), MonotonicClock, vec![Box::new(source)]);
        mirror
            .add_viewer(ViewerSettings::new(Duration::from_millis(50), 50.0, SourceId(0)))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let outcome = mirror.run(HeadlessSurface::new(), FsPersistence::new(dir.path()));

        assert!(matches!(
            outcome.reason,
            Some(ShutdownReason::CaptureFailed {
                source: SourceId(0),
                ..
            })
        ));
        assert!(outcome.reason.as_ref().is_some_and(ShutdownReason::is_fatal));
        // close_all ran
        assert_eq!(outcome.surface.labels().count(), 0);
        assert!(outcome.stats.is_empty());
    }

    /// Hands out a few frames, then hits a bug.
    struct BuggySource {
        inner: PatternSource,
        left: u32,
    }

    impl CaptureSource for BuggySource {
        fn id(&self) -> SourceId {
            self.inner.id()
        }

        fn acquire(&mut self) -> Result<Frame, CaptureError> {
            if self.left == 0 {
                panic!("driver bug");
            }
            self.left -= 1;
            self.inner.acquire()
        }

        fn native_rate(&self) -> f64 {
            self.inner.native_rate()
        }

        fn release(&mut self) {
            self.inner.release()
        }
    }

    #[test]
    fn panicking_capture_thread_stops_every_loop() {
        let source = BuggySource {
            inner: PatternSource::new(SourceId(0), 8, 6, 100.0),
            left: 10,
        };
        let mirror = Mirror::new(config(), MonotonicClock, vec![Box::new(source)]);
        mirror
            .add_viewer(ViewerSettings::new(Duration::from_millis(20), 50.0, SourceId(0)))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let outcome = mirror.run(HeadlessSurface::new(), FsPersistence::new(dir.path()));

        assert_eq!(
            outcome.reason,
            Some(ShutdownReason::LoopPanicked("capture-0".into()))
        );
        assert!(outcome.reason.as_ref().is_some_and(ShutdownReason::is_fatal));
        assert_eq!(outcome.surface.labels().count(), 0);
    }

    #[test]
    fn quit_before_start_returns_promptly() {
        let source = PatternSource::new(SourceId(0), 4, 4, 30.0);
        let shutdown = Shutdown::new();
        shutdown.trigger(ShutdownReason::Signal);
        let mirror = Mirror::new(config(), MonotonicClock, vec![Box::new(source)])
            .with_shutdown(shutdown);

        let dir = tempfile::tempdir().unwrap();
        let outcome = mirror.run(HeadlessSurface::new(), FsPersistence::new(dir.path()));
        assert_eq!(outcome.reason, Some(ShutdownReason::Signal));
    }
}
