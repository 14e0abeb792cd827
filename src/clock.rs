//! Time sources for session engines
//!
//! Engines never read wall-clock time themselves; every operation takes an
//! explicit `now` in milliseconds. A [`Clock`] is what the host reads to
//! produce those timestamps. Hosts with a real frame clock implement the
//! trait over it; scripted play uses [`ManualClock`].

use std::cell::Cell;

/// Milliseconds on a session timeline
pub type Millis = u64;

/// A source of millisecond timestamps
pub trait Clock {
    /// Current time in milliseconds
    fn now_ms(&self) -> Millis;
}

/// Manually advanced clock for tests and simulation
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Millis>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Move the clock forward by `delta` milliseconds
    pub fn advance(&self, delta: Millis) -> Millis {
        let next = self.now.get().saturating_add(delta);
        self.now.set(next);
        next
    }

    /// Jump to an absolute time; time never moves backwards
    pub fn set(&self, at: Millis) {
        if at > self.now.get() {
            self.now.set(at);
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        assert_eq!(clock.advance(250), 1_250);
        clock.set(1_100);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(2_000);
        assert_eq!(clock.now_ms(), 2_000);
    }

    #[test]
    fn test_manual_clock_reads_through_trait() {
        fn elapsed(clock: &dyn Clock, since: Millis) -> Millis {
            clock.now_ms() - since
        }
        let clock = ManualClock::new(500);
        clock.advance(100);
        assert_eq!(elapsed(&clock, 500), 100);
    }
}
