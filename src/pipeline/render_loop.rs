//! Consumer loop: shows every viewer at its own cadence and handles keys
//!
//! Runs on the thread that owns the render surface. Each pass applies
//! pending console commands, shows every viewer whose refresh period has
//! elapsed, then polls one key.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::Receiver;
use tracing::{debug, error, info, warn};

use super::buffer::FrameStore;
use super::shutdown::{Shutdown, ShutdownReason};
use super::viewer::{format_secs, refresh_period, Viewer, ViewerId, ViewerRegistry};
use crate::capture::Frame;
use crate::clock::Clock;
use crate::display::{compose_side_by_side, KeyCommand, Persistence, RenderSurface};
use crate::error::{ConfigError, PersistError, RenderError};
use crate::setup::validate::{check_rate, RateCap};
use crate::setup::ViewerCommand;
use crate::OutputConfig;

/// Applies one console edit to the registry.
pub fn apply_command(
    registry: &ViewerRegistry,
    store: &FrameStore,
    command: ViewerCommand,
    shutdown: &Shutdown,
) -> Result<(), ConfigError> {
    match command {
        ViewerCommand::Add(settings) => {
            registry.add(settings, store)?;
        }
        ViewerCommand::Remove(id) => {
            registry.remove(id)?;
        }
        ViewerCommand::SetDelay(id, delay) => registry.set_delay(id, delay)?,
        ViewerCommand::SetRate(id, rate) => {
            let viewer = registry.get(id).ok_or(ConfigError::UnknownViewer(id))?;
            let native = store
                .native_rate(viewer.source())
                .ok_or(ConfigError::UnknownSource(viewer.source()))?;
            let rate = check_rate(rate, native, RateCap::Reject)?;
            registry.set_refresh_period(id, refresh_period(rate))?;
        }
        ViewerCommand::List => {
            let multi_source = store.len() > 1;
            for viewer in registry.snapshot().iter() {
                info!(
                    viewer = %viewer.id(),
                    fps = 1.0 / viewer.refresh_period().as_secs_f64(),
                    "{}",
                    viewer.label(multi_source)
                );
            }
        }
        ViewerCommand::Quit => shutdown.trigger(ShutdownReason::UserQuit),
    }
    Ok(())
}

struct Window {
    label: String,
    last_render: Option<Instant>,
}

pub struct RenderLoop<'a, R, P, C> {
    registry: &'a ViewerRegistry,
    store: &'a FrameStore,
    surface: R,
    persist: P,
    clock: C,
    output: OutputConfig,
    commands: Option<Receiver<ViewerCommand>>,
    inline_cursor_update: bool,
    idle: Duration,
    windows: HashMap<ViewerId, Window>,
    snapshots: u32,
}

impl<'a, R, P, C> RenderLoop<'a, R, P, C>
where
    R: RenderSurface,
    P: Persistence,
    C: Clock,
{
    pub fn new(
        registry: &'a ViewerRegistry,
        store: &'a FrameStore,
        surface: R,
        persist: P,
        clock: C,
        output: OutputConfig,
    ) -> Self {
        Self {
            registry,
            store,
            surface,
            persist,
            clock,
            output,
            commands: None,
            inline_cursor_update: false,
            idle: Duration::ZERO,
            windows: HashMap::new(),
            snapshots: 0,
        }
    }

    pub fn with_commands(mut self, commands: Receiver<ViewerCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Advance each cursor right before showing it instead of relying on
    /// the cursor update loop.
    pub fn with_inline_cursor_update(mut self, inline: bool) -> Self {
        self.inline_cursor_update = inline;
        self
    }

    /// Longest wait between passes while no viewer is due.
    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub fn surface(&self) -> &R {
        &self.surface
    }

    pub fn persistence(&self) -> &P {
        &self.persist
    }

    pub fn into_parts(self) -> (R, P) {
        (self.surface, self.persist)
    }

    pub fn run(&mut self, shutdown: &Shutdown) {
        info!(viewers = self.registry.len(), "render loop started");
        while !shutdown.is_triggered() {
            if let Err(e) = self.tick(shutdown) {
                error!("Render error: {}", e);
                shutdown.trigger(ShutdownReason::RenderFailed(e.to_string()));
            }
        }
        info!(snapshots = self.snapshots, "render loop stopped");
    }

    /// One pass: commands, due viewers, one key, then idle until the next
    /// viewer is due.
    pub fn tick(&mut self, shutdown: &Shutdown) -> Result<(), RenderError> {
        if let Some(commands) = &self.commands {
            for command in commands.try_iter() {
                if let Err(e) = apply_command(self.registry, self.store, command, shutdown) {
                    warn!("{}", e);
                }
            }
        }

        let viewers = self.registry.snapshot();
        let now = self.clock.now();
        self.render_due(&viewers, now)?;

        if let Some(key) = self.surface.poll_key() {
            self.handle_key(key, shutdown);
        }

        self.wait_for_next(&viewers);
        Ok(())
    }

    fn render_due(&mut self, viewers: &[Arc<Viewer>], now: Instant) -> Result<(), RenderError> {
        let multi_source = self.store.len() > 1;

        // Windows of removed viewers go first
        let surface = &mut self.surface;
        self.windows.retain(|id, window| {
            let alive = viewers.iter().any(|v| v.id() == *id);
            if !alive {
                surface.destroy(&window.label);
            }
            alive
        });

        for viewer in viewers {
            let Some(buffer) = self.store.buffer(viewer.source()) else {
                continue;
            };

            let label = viewer.label(multi_source);
            let window = self.windows.entry(viewer.id()).or_insert_with(|| Window {
                label: label.clone(),
                last_render: None,
            });
            if window.label != label {
                debug!(viewer = %viewer.id(), from = %window.label, to = %label, "relabel");
                self.surface.destroy(&window.label);
                window.label = label;
            }

            let due = window
                .last_render
                .map_or(true, |last| now.saturating_duration_since(last) >= viewer.refresh_period());
            if !due {
                continue;
            }

            if self.inline_cursor_update {
                viewer.advance(buffer, now);
            }
            // Nothing captured yet
            let Some((frame, timestamp)) = viewer.current(buffer) else {
                continue;
            };

            self.surface.show(&window.label, &frame)?;
            window.last_render = Some(now);

            metrics::counter!("frames_rendered").increment(1);
            metrics::histogram!("realized_delay_ms", "viewer" => viewer.id().to_string())
                .record(now.saturating_duration_since(timestamp).as_secs_f64() * 1e3);
        }
        Ok(())
    }

    fn handle_key(&mut self, key: char, shutdown: &Shutdown) {
        match KeyCommand::from_key(key) {
            Some(KeyCommand::Quit) => shutdown.trigger(ShutdownReason::UserQuit),
            Some(KeyCommand::Snapshot) => match self.snapshot() {
                Ok(path) => info!("Combined screenshot saved as {}", path.display()),
                Err(e) => warn!("Snapshot failed: {}", e),
            },
            Some(KeyCommand::Diagnostics) => match self.diagnostics() {
                Ok(()) => info!(
                    "Display time differences saved to {}",
                    self.output.diagnostics_file.display()
                ),
                Err(e) => warn!("Diagnostics failed: {}", e),
            },
            None => debug!(%key, "unbound key"),
        }
    }

    fn current_frames(&self) -> Vec<Frame> {
        self.registry
            .snapshot()
            .iter()
            .filter_map(|viewer| {
                let buffer = self.store.buffer(viewer.source())?;
                viewer.current(buffer).map(|(frame, _)| frame)
            })
            .collect()
    }

    /// Saves every viewer's current frame side by side as the next
    /// numbered snapshot.
    pub fn snapshot(&mut self) -> Result<PathBuf, PersistError> {
        let image = compose_side_by_side(&self.current_frames())?;
        self.snapshots += 1;
        let path = PathBuf::from(format!(
            "{}_{}.png",
            self.output.snapshot_prefix, self.snapshots
        ));
        self.persist.save_image(&path, &image)?;
        Ok(path)
    }

    /// `delay=<target>s realized=<now - cursor>s` per viewer, in viewer
    /// order. Viewers without a frame yet report zero.
    pub fn diagnostics_line(&self, now: Instant) -> String {
        self.registry
            .snapshot()
            .iter()
            .map(|viewer| {
                let realized = self
                    .store
                    .buffer(viewer.source())
                    .and_then(|buffer| viewer.realized_delay(buffer, now))
                    .unwrap_or_default();
                format!(
                    "delay={}s realized={:.3}s",
                    format_secs(viewer.delay()),
                    realized.as_secs_f64()
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn diagnostics(&mut self) -> Result<(), PersistError> {
        let line = self.diagnostics_line(self.clock.now());
        let path = self.output.diagnostics_file.clone();
        self.persist.append_line(&path, &line)
    }

    fn wait_for_next(&self, viewers: &[Arc<Viewer>]) {
        if self.idle.is_zero() {
            return;
        }
        let now = self.clock.now();
        let wait = viewers
            .iter()
            .filter_map(|viewer| {
                let last = self.windows.get(&viewer.id())?.last_render?;
                Some((last + viewer.refresh_period()).saturating_duration_since(now))
            })
            .min()
            .map_or(self.idle, |until_due| until_due.min(self.idle));
        if !wait.is_zero() {
            self.clock.sleep(wait);
        }
    }
}
