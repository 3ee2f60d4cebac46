//! Clock port. Engines never call `Utc::now()` directly; they take an
//! `Arc<dyn Clock>` so sweepers and sliding windows are testable.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock used by the binaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests. Advancing it is how reaper/expiry/window
/// suites move through time deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("clock poisoned");
        *now += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().expect("clock poisoned");
        *now = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Utc::now());
        let t0 = clock.now();
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now() - t0, Duration::hours(2));
    }
}
