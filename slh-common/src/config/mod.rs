//! Configuration system for the suite harness.
//!
//! This module provides:
//! - Environment variable parsing with type safety
//! - Source tracking for debugging
//! - The key-value config store suites are configured through
//! - Ambient harness settings (seed, nightly mode, protected prefixes)

pub mod env;
pub mod settings;
pub mod source;
pub mod store;

pub use env::{EnvError, EnvParser};
pub use settings::{HarnessSettings, merge_protected_prefixes};
pub use source::{ConfigSource, Sourced};
pub use store::{ConfigStore, MemoryConfigStore, StoreError, StoreSnapshot};

/// Store key: abort the whole suite before any test runs.
pub const FORCE_SUITE_ABORT_KEY: &str = "tests.force.assumption.failure.beforeclass";
/// Store key: skip each test at its per-test check.
pub const FORCE_TEST_ABORT_KEY: &str = "tests.force.assumption.failure.before";
/// Store key: suite time budget in whole seconds.
pub const SUITE_TIMEOUT_KEY: &str = "tests.suite.timeout.secs";
/// Store key: seed override, decimal or `0x` hex.
pub const SEED_KEY: &str = "tests.seed";
/// Store key: URL scheme derived from the SSL posture.
pub const URL_SCHEME_KEY: &str = "harness.url.scheme";
/// Store key: default config directory advertised to the system under test.
pub const DEFAULT_CONFDIR_KEY: &str = "harness.default.confdir";

/// Budget used when the store does not set [`SUITE_TIMEOUT_KEY`].
pub const DEFAULT_SUITE_TIMEOUT_SECS: u64 = 25;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Turn an `SLH_LOG_LEVEL` value into an `EnvFilter` directive.
///
/// A bare level (`debug`) scopes to the harness crates; anything else is
/// already a directive (`slh_common=debug,warn`) and passes through.
pub fn log_directive(value: &str) -> String {
    let value = value.trim();
    let lower = value.to_lowercase();
    if LOG_LEVELS.contains(&lower.as_str()) {
        format!("slh={lower},slh_common={lower}")
    } else {
        value.to_string()
    }
}

/// Parse the boolean spellings accepted across env vars and store values.
pub(crate) fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Parse a seed written as decimal or `0x`-prefixed hex.
pub(crate) fn parse_seed_str(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => trimmed.parse().ok(),
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
