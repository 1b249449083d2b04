//! Realized-delay sampling for measurement runs
//!
//! Samples `now - cursor.timestamp` for every viewer at jittered intervals
//! and summarises the error against each viewer's target delay.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, instrument};

use super::buffer::FrameStore;
use super::shutdown::{Shutdown, ShutdownReason};
use super::viewer::{format_secs, ViewerId, ViewerRegistry};
use crate::clock::Clock;
use crate::display::Persistence;
use crate::error::PersistError;
use crate::StatsConfig;

/// Longest single sleep while waiting, so shutdown is noticed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Realized delays of one viewer, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayStats {
    target: Duration,
    samples: Vec<f64>,
}

impl DelayStats {
    pub fn new(target: Duration) -> Self {
        Self {
            target,
            samples: Vec::new(),
        }
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    pub fn record(&mut self, realized: Duration) {
        self.samples.push(realized.as_secs_f64());
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Root mean square distance from `center`.
    pub fn std_dev(&self, center: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|v| (v - center).powi(2)).sum();
        Some((sum / self.samples.len() as f64).sqrt())
    }

    pub fn target_std_dev(&self) -> Option<f64> {
        self.std_dev(self.target.as_secs_f64())
    }

    pub fn high(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    pub fn low(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::min)
    }

    pub fn summary_line(&self) -> Option<String> {
        let average = self.average()?;
        Some(format!(
            "Target delay: {}; Average: {}; Std dev: {}; Target Std dev: {}; High: {}; Low: {}",
            self.target.as_secs_f64(),
            average,
            self.std_dev(average)?,
            self.target_std_dev()?,
            self.high()?,
            self.low()?,
        ))
    }

    /// `<delay>s_delay_data.txt`
    pub fn raw_file_name(&self) -> PathBuf {
        PathBuf::from(format!("{}s_delay_data.txt", format_secs(self.target)))
    }

    pub fn raw_dump(&self) -> String {
        let values: Vec<String> = self.samples.iter().map(f64::to_string).collect();
        format!(
            "Target Delay: {}\n[ {}]",
            self.target.as_secs_f64(),
            values.join(", ")
        )
    }
}

/// Appends one summary line per viewer to `summary_file` and the raw
/// samples to each viewer's own file. Viewers without samples are skipped.
pub fn write_stats<P: Persistence>(
    persist: &mut P,
    summary_file: &Path,
    stats: &[DelayStats],
) -> Result<(), PersistError> {
    for entry in stats {
        let Some(summary) = entry.summary_line() else {
            continue;
        };
        persist.append_line(summary_file, &summary)?;
        persist.append_line(&entry.raw_file_name(), &entry.raw_dump())?;
    }
    Ok(())
}

pub struct StatsLoop<'a, C> {
    registry: &'a ViewerRegistry,
    store: &'a FrameStore,
    clock: C,
    interval_us: (u64, u64),
    max_samples: Option<usize>,
    rng: StdRng,
}

impl<'a, C: Clock> StatsLoop<'a, C> {
    pub fn new(registry: &'a ViewerRegistry, store: &'a FrameStore, clock: C, config: &StatsConfig) -> Self {
        let low = config.sample_min_us.max(1);
        Self {
            registry,
            store,
            clock,
            interval_us: (low, config.sample_max_us.max(low)),
            max_samples: config.max_samples,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Sleeps for `duration` in slices. Returns false if shutdown tripped.
    fn wait(&self, duration: Duration, shutdown: &Shutdown) -> bool {
        let deadline = self.clock.now() + duration;
        loop {
            if shutdown.is_triggered() {
                return false;
            }
            let now = self.clock.now();
            let Some(left) = deadline.checked_duration_since(now).filter(|d| !d.is_zero()) else {
                return true;
            };
            self.clock.sleep(left.min(WAIT_SLICE));
        }
    }

    /// Samples until shutdown or the sample limit, returning per-viewer
    /// stats ordered by viewer id.
    #[instrument(name = "delay_stats", skip_all)]
    pub fn run(mut self, shutdown: &Shutdown) -> Vec<DelayStats> {
        let mut stats: BTreeMap<ViewerId, DelayStats> = BTreeMap::new();

        // Let the slowest viewer accumulate its history first
        let longest = self
            .registry
            .snapshot()
            .iter()
            .map(|v| v.delay())
            .max()
            .unwrap_or_default();
        info!(warmup_s = longest.as_secs_f64(), "delay statistics loop started");
        if !self.wait(longest, shutdown) {
            return stats.into_values().collect();
        }

        let mut taken = 0usize;
        loop {
            let (low, high) = self.interval_us;
            let pause = Duration::from_micros(self.rng.gen_range(low..=high));
            if !self.wait(pause, shutdown) {
                break;
            }

            let now = self.clock.now();
            for viewer in self.registry.snapshot().iter() {
                let Some(buffer) = self.store.buffer(viewer.source()) else {
                    continue;
                };
                if let Some(realized) = viewer.realized_delay(buffer, now) {
                    stats
                        .entry(viewer.id())
                        .or_insert_with(|| DelayStats::new(viewer.delay()))
                        .record(realized);
                }
            }

            taken += 1;
            if self.max_samples.is_some_and(|max| taken >= max) {
                debug!(taken, "sample limit reached");
                shutdown.trigger(ShutdownReason::SampleLimit);
                break;
            }
        }

        info!(samples = taken, "delay statistics loop stopped");
        stats.into_values().collect()
    }
}
