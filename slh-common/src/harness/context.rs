//! Per-suite state shared between lifecycle hooks and test threads.

use super::clock::ClockToken;
use super::ssl::SslPosture;
use crate::config::parse_seed_str;
use rand::distr::{Bernoulli, Distribution};
use rand::rngs::StdRng;
use rand::{Rng, RngExt, SeedableRng};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// The randomization source for one suite.
///
/// Components never share a generator: each draws from its own stream,
/// derived from the seed and a label, so adding a draw in one component
/// does not shift the values another component sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuiteSeed(pub u64);

impl SuiteSeed {
    /// A fresh seed from the thread-local generator.
    pub fn random() -> Self {
        Self(rand::random::<u64>())
    }

    /// Deterministic generator for `label`, keyed by blake3 of seed and label.
    pub fn stream(&self, label: &str) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.0.to_le_bytes());
        hasher.update(label.as_bytes());
        StdRng::from_seed(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for SuiteSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl FromStr for SuiteSeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_seed_str(s)
            .map(SuiteSeed)
            .ok_or_else(|| format!("invalid seed '{s}': expected decimal or 0x hex"))
    }
}

pub(crate) fn draw_u64<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    rng.random()
}

/// True with probability `p`; above 1 is always, below 0 or NaN never.
pub(crate) fn draw_chance<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    match Bernoulli::new(p) {
        Ok(dist) => dist.sample(rng),
        Err(_) => p > 1.0,
    }
}

pub(crate) fn draw_bool<R: Rng + ?Sized>(rng: &mut R) -> bool {
    rng.random()
}

/// A deferred interrupt request: unset, or set to one filter.
///
/// Consuming is a single read-and-clear so a request set concurrently
/// with teardown is either reaped now or left for the next consumer,
/// never lost between a read and a separate clear.
#[derive(Debug, Default)]
pub struct PendingInterrupt {
    filter: Mutex<Option<String>>,
}

impl PendingInterrupt {
    /// Record `filter`, returning the request it replaced, if any.
    pub fn request(&self, filter: impl Into<String>) -> Option<String> {
        self.lock().replace(filter.into())
    }

    /// Read and clear the request.
    pub fn take(&self) -> Option<String> {
        self.lock().take()
    }

    pub fn peek(&self) -> Option<String> {
        self.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.filter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One suite's shared state, created at suite setup.
///
/// Everything but the pending interrupt is fixed once setup finishes;
/// tests may run on other threads and only ever touch `pending`.
#[derive(Debug)]
pub struct SuiteContext {
    pub suite_name: String,
    pub seed: SuiteSeed,
    pub fast_mode: bool,
    pub ssl: SslPosture,
    pub started: ClockToken,
    pub budget: Duration,
    pub pending: PendingInterrupt,
}
