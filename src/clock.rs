//! Monotonic time source shared by every loop.
//!
//! All intervals in the pipeline are measured against a [`Clock`]. The real
//! implementation reads [`Instant::now`]; [`ManualClock`] lets tests drive
//! simulated time deterministically.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;
use parking_lot::Mutex;

/// Monotonic clock plus the two ways a loop can wait on it.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Coarse sleep. May overshoot.
    fn sleep(&self, duration: Duration);

    /// Fine-grained wait until `deadline`. Returns immediately if it passed.
    fn spin_until(&self, deadline: Instant) {
        let backoff = Backoff::new();
        while self.now() < deadline {
            backoff.snooze();
            if backoff.is_completed() {
                backoff.reset();
            }
        }
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }

    fn spin_until(&self, deadline: Instant) {
        (**self).spin_until(deadline)
    }
}

/// Wall clock backed by the OS monotonic timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock. Time only moves through [`ManualClock::advance`],
/// [`Clock::sleep`] or [`Clock::spin_until`].
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Instant at simulated time zero.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Instant `secs` seconds after the origin.
    pub fn at(&self, secs: f64) -> Instant {
        self.origin + Duration::from_secs_f64(secs)
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    pub fn set(&self, secs: f64) {
        *self.elapsed.lock() = Duration::from_secs_f64(secs);
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn spin_until(&self, deadline: Instant) {
        let mut elapsed = self.elapsed.lock();
        let target = deadline.saturating_duration_since(self.origin);
        if target > *elapsed {
            *elapsed = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);

        clock.sleep(Duration::from_millis(40));
        assert_eq!(clock.now() - t0, Duration::from_millis(40));

        clock.spin_until(clock.at(1.0));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));

        // A deadline in the past is a no-op
        clock.spin_until(clock.at(0.5));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn monotonic_spin_reaches_deadline() {
        let clock = MonotonicClock;
        let deadline = clock.now() + Duration::from_millis(2);
        clock.spin_until(deadline);
        assert!(clock.now() >= deadline);
    }
}
