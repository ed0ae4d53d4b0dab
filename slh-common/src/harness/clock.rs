//! Monotonic suite timing.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of monotonic instants.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Opaque start marker returned by [`SuiteClock::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockToken {
    started: Instant,
}

/// Records when a suite started and how long it has run.
#[derive(Clone)]
pub struct SuiteClock {
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SuiteClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteClock").finish_non_exhaustive()
    }
}

impl Default for SuiteClock {
    fn default() -> Self {
        Self::monotonic()
    }
}

impl SuiteClock {
    pub fn monotonic() -> Self {
        Self {
            clock: Arc::new(MonotonicClock),
        }
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn start(&self) -> ClockToken {
        ClockToken {
            started: self.clock.now(),
        }
    }

    /// Time since `token`; zero if the clock reads earlier than the token.
    pub fn elapsed(&self, token: &ClockToken) -> Duration {
        self.clock.now().saturating_duration_since(token.started)
    }
}
