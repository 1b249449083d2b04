//! Fixed-interval loop skeleton with overshoot carry-forward.
//!
//! Each iteration sleeps for a fraction of the time left before its deadline
//! and spins the remainder away. How late the iteration actually finished is
//! subtracted from the next iteration's start, so deadlines stay on a fixed
//! grid instead of slipping a little further every time.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::pipeline::Shutdown;

/// Share of the remaining time handed to the coarse sleep.
pub const DEFAULT_SLEEP_FRACTION: f64 = 0.9383;

/// Deadline of one paced iteration.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub start: Instant,
    pub deadline: Instant,
}

pub struct Pacer<C> {
    clock: C,
    interval: Duration,
    sleep_fraction: f64,
    spin: bool,
    correction: Duration,
}

impl<C: Clock> Pacer<C> {
    pub fn new(clock: C, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            sleep_fraction: DEFAULT_SLEEP_FRACTION,
            spin: true,
            correction: Duration::ZERO,
        }
    }

    /// Fraction of the remaining time to sleep before spinning, in `(0, 1]`.
    pub fn with_sleep_fraction(mut self, fraction: f64) -> Self {
        self.sleep_fraction = fraction.clamp(f64::EPSILON, 1.0);
        self
    }

    /// Without the spin phase the pacer sleeps the whole remainder.
    pub fn with_spin(mut self, spin: bool) -> Self {
        self.spin = spin;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Overshoot carried into the next iteration.
    pub fn correction(&self) -> Duration {
        self.correction
    }

    pub fn begin(&self) -> Tick {
        let now = self.clock.now();
        let start = now.checked_sub(self.correction).unwrap_or(now);
        Tick {
            start,
            deadline: start + self.interval,
        }
    }

    /// Waits out the rest of `tick` and records the overshoot.
    pub fn finish(&mut self, tick: Tick) {
        let now = self.clock.now();
        if let Some(remaining) = tick.deadline.checked_duration_since(now) {
            if self.spin {
                self.clock.sleep(remaining.mul_f64(self.sleep_fraction));
                self.clock.spin_until(tick.deadline);
            } else {
                self.clock.sleep(remaining);
            }
        }

        let overshoot = self.clock.now().saturating_duration_since(tick.deadline);
        // A stall longer than one interval is dropped rather than repaid
        self.correction = overshoot.min(self.interval);
        metrics::histogram!("pacing_overshoot_us").record(overshoot.as_micros() as f64);
    }

    /// Runs `work` once per interval until it breaks or `shutdown` trips.
    pub fn run<F>(&mut self, shutdown: &Shutdown, mut work: F)
    where
        F: FnMut(Instant) -> ControlFlow<()>,
    {
        while !shutdown.is_triggered() {
            let tick = self.begin();
            if work(self.clock.now()).is_break() {
                break;
            }
            self.finish(tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::sync::Arc;

    /// Simulated clock whose sleeps overshoot by a random amount.
    struct JitterClock {
        inner: ManualClock,
        rng: parking_lot::Mutex<StdRng>,
        max_overshoot: Duration,
    }

    impl Clock for JitterClock {
        fn now(&self) -> Instant {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            let extra = self.rng.lock().gen_range(0..=self.max_overshoot.as_nanos() as u64);
            self.inner.advance(duration + Duration::from_nanos(extra));
        }

        fn spin_until(&self, deadline: Instant) {
            self.inner.spin_until(deadline);
        }
    }

    #[test]
    fn deadlines_stay_on_grid() {
        let clock = ManualClock::new();
        let interval = Duration::from_millis(10);
        let mut pacer = Pacer::new(clock.clone(), interval);

        for _ in 0..100 {
            let tick = pacer.begin();
            clock.advance(Duration::from_millis(3));
            pacer.finish(tick);
        }
        assert_eq!(clock.elapsed(), Duration::from_millis(1000));
        assert_eq!(pacer.correction(), Duration::ZERO);
    }

    #[test]
    fn drift_stays_bounded_under_random_overshoot() {
        let interval = Duration::from_millis(5);
        let clock = Arc::new(JitterClock {
            inner: ManualClock::new(),
            rng: parking_lot::Mutex::new(StdRng::seed_from_u64(7)),
            max_overshoot: interval,
        });
        let mut pacer = Pacer::new(clock.clone(), interval);
        let mut work_rng = StdRng::seed_from_u64(11);

        for iterations in [100u32, 1_000, 10_000] {
            let origin = clock.inner.elapsed();
            for _ in 0..iterations {
                let tick = pacer.begin();
                let work = work_rng.gen_range(0..interval.as_nanos() as u64 / 2);
                clock.inner.advance(Duration::from_nanos(work));
                pacer.finish(tick);
            }

            let scheduled = interval * iterations;
            let actual = clock.inner.elapsed() - origin;
            let drift = actual.saturating_sub(scheduled);
            assert!(
                drift <= interval * 2,
                "drift {drift:?} after {iterations} iterations"
            );
        }
    }

    #[test]
    fn naive_sleep_would_drift() {
        // Sanity check on the harness: sleeping the plain interval with the
        // same jitter accumulates error linearly.
        let interval = Duration::from_millis(5);
        let clock = JitterClock {
            inner: ManualClock::new(),
            rng: parking_lot::Mutex::new(StdRng::seed_from_u64(7)),
            max_overshoot: interval,
        };
        for _ in 0..1_000 {
            clock.sleep(interval);
        }
        assert!(clock.inner.elapsed() > interval * 1_000 + interval * 100);
    }

    #[test]
    fn run_stops_on_shutdown() {
        let clock = ManualClock::new();
        let shutdown = Shutdown::new();
        let mut pacer = Pacer::new(clock.clone(), Duration::from_millis(1));
        let mut count = 0;
        pacer.run(&shutdown, |_| {
            count += 1;
            if count == 5 {
                shutdown.trigger(crate::pipeline::ShutdownReason::UserQuit);
            }
            ControlFlow::Continue(())
        });
        assert_eq!(count, 5);
        assert_eq!(clock.elapsed(), Duration::from_millis(5));
    }
}
