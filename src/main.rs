//! Chronomirror: live camera time-delay mirror

use std::io;
use std::path::PathBuf;
use std::thread;

use chronomirror::capture::{CaptureSource, PatternSource, SourceId};
use chronomirror::clock::MonotonicClock;
use chronomirror::display::{FsPersistence, HeadlessSurface};
use chronomirror::pipeline::{watch_ctrl_c, Mirror, ShutdownReason, ViewerSettings};
use chronomirror::setup::{run_console, settings_from_spec, Prompter};
use chronomirror::Config;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chronomirror", version, about = "Live video time-delay mirror")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use synthetic test-pattern sources instead of cameras
    #[arg(long)]
    pattern: bool,

    /// Run without windows
    #[arg(long)]
    headless: bool,

    /// Take viewers from the configuration file instead of asking
    #[arg(long)]
    no_prompt: bool,

    /// Accept viewer edits on stdin while running
    #[arg(long)]
    live: bool,

    /// Log filter, e.g. `chronomirror=debug`. Defaults to RUST_LOG, then
    /// `chronomirror=info`
    #[arg(long)]
    log_filter: Option<String>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let filter = match &args.log_filter {
        Some(filter) => EnvFilter::try_new(filter)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chronomirror=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Chronomirror launching...");

    let mut config = Config::load(args.config.as_deref())?;
    config.display.headless |= args.headless;
    config.pipeline.live |= args.live;

    let prompting = !args.no_prompt;
    let mut prompter = Prompter::new(io::stdin().lock(), io::stdout());
    if prompting {
        let (width, height) = prompter.resolution()?;
        config.capture.width = width;
        config.capture.height = height;
    }

    let sources = if args.pattern {
        pattern_sources(&config)
    } else {
        open_cameras(&config)?
    };
    let rates: Vec<(SourceId, f64)> = sources.iter().map(|s| (s.id(), s.native_rate())).collect();
    for (id, rate) in &rates {
        info!(source = %id, fps = rate, "capture source ready");
    }

    let viewers: Vec<ViewerSettings> = if prompting {
        prompter.viewers(&rates)?
    } else {
        config
            .viewers
            .iter()
            .filter_map(|spec| {
                let native = |id: SourceId| rates.iter().find(|(s, _)| *s == id).map(|(_, r)| *r);
                settings_from_spec(spec, native)
                    .map_err(|e| warn!("Skipping configured viewer {:?}: {}", spec, e))
                    .ok()
            })
            .collect()
    };
    // Release stdin for the console
    drop(prompter);

    if viewers.is_empty() && !config.pipeline.live {
        warn!("No viewers configured; only quit and Ctrl-C will do anything");
    }

    let mut mirror = Mirror::new(config.clone(), MonotonicClock, sources);
    for settings in viewers {
        mirror.add_viewer(settings)?;
    }
    watch_ctrl_c(mirror.shutdown().clone())?;

    if config.pipeline.live {
        let (tx, rx) = flume::unbounded();
        let store = mirror.store().clone();
        thread::Builder::new()
            .name("console".into())
            .spawn(move || run_console(io::stdin().lock(), &store, tx))?;
        info!("Live console: add <delay> <fps> [camera] | remove <id> | delay <id> <s> | rate <id> <fps> | list | quit");
        mirror = mirror.with_commands(rx);
    }

    let reason = run_mirror(mirror, &config)?;
    info!("Chronomirror shutting down");
    match reason {
        Some(reason) if reason.is_fatal() => Err(eyre!("{}", reason)),
        _ => Ok(()),
    }
}

fn pattern_sources(config: &Config) -> Vec<Box<dyn CaptureSource>> {
    let capture = &config.capture;
    (0..capture.pattern_sources.max(1))
        .map(|i| {
            Box::new(PatternSource::new(
                SourceId(i),
                capture.width,
                capture.height,
                capture.fps,
            )) as Box<dyn CaptureSource>
        })
        .collect()
}

#[cfg(feature = "v4l-capture")]
fn open_cameras(config: &Config) -> Result<Vec<Box<dyn CaptureSource>>> {
    use chronomirror::capture::V4l2Source;
    use chronomirror::utils;

    // Configured paths use the configured format, detected ones their own
    let devices: Vec<(String, chronomirror::capture::PixelFormat)> = if config.capture.devices.is_empty() {
        utils::detect_devices()
            .into_iter()
            .map(|found| (found.path, found.format))
            .collect()
    } else {
        config
            .capture
            .devices
            .iter()
            .map(|path| (path.clone(), config.capture.format))
            .collect()
    };
    if devices.is_empty() {
        return Err(eyre!("Camera not detected"));
    }

    let mut sources: Vec<Box<dyn CaptureSource>> = Vec::with_capacity(devices.len());
    for (i, (path, format)) in devices.into_iter().enumerate() {
        let mut capture = config.capture.clone();
        capture.format = format;
        let source = V4l2Source::open(SourceId(i as u32), &path, &capture)?;
        info!("Using capture device: {}", path);
        sources.push(Box::new(source));
    }
    Ok(sources)
}

#[cfg(not(feature = "v4l-capture"))]
fn open_cameras(_config: &Config) -> Result<Vec<Box<dyn CaptureSource>>> {
    Err(eyre!(
        "built without camera support; pass --pattern or rebuild with --features v4l-capture"
    ))
}

#[cfg(feature = "sdl-display")]
fn run_mirror(mirror: Mirror<MonotonicClock>, config: &Config) -> Result<Option<ShutdownReason>> {
    let persist = FsPersistence::new(config.output.directory.clone());
    if config.display.headless {
        return Ok(mirror.run(HeadlessSurface::new(), persist).reason);
    }
    let surface = chronomirror::display::Sdl2Surface::new(config.display.vsync)?;
    Ok(mirror.run(surface, persist).reason)
}

#[cfg(not(feature = "sdl-display"))]
fn run_mirror(mirror: Mirror<MonotonicClock>, config: &Config) -> Result<Option<ShutdownReason>> {
    if !config.display.headless {
        warn!("Built without sdl-display, running headless");
    }
    let persist = FsPersistence::new(config.output.directory.clone());
    Ok(mirror.run(HeadlessSurface::new(), persist).reason)
}
