//! Ambient harness settings resolved from the environment.

use super::env::{EnvError, EnvParser};
use super::source::Sourced;
use crate::harness::reaper::DEFAULT_PROTECTED_PREFIXES;
use std::path::PathBuf;

/// Settings that shape a whole suite run.
///
/// | Variable                 | Meaning                                   |
/// |--------------------------|-------------------------------------------|
/// | `SLH_SEED`               | Suite seed (decimal or `0x` hex)          |
/// | `SLH_NIGHTLY`            | Thorough run; disables fast mode          |
/// | `SLH_LOG_LEVEL`          | Level or `EnvFilter` directive for logs   |
/// | `SLH_PROTECTED_PREFIXES` | Extra task-name prefixes the reaper skips |
/// | `SLH_DEFAULT_CONFDIR`    | Default config directory (`~` expanded)   |
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    pub seed: Sourced<Option<u64>>,
    pub nightly: Sourced<bool>,
    pub log_level: Sourced<String>,
    pub protected_prefixes: Sourced<Vec<String>>,
    pub default_confdir: Sourced<Option<PathBuf>>,
}

impl HarnessSettings {
    /// Resolve settings from `SLH_*` environment variables.
    ///
    /// Every malformed variable is reported, not just the first.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::new();
        let settings = Self::from_parser(&mut parser);
        if parser.has_errors() {
            return Err(parser.take_errors());
        }
        Ok(settings)
    }

    pub fn from_parser(parser: &mut EnvParser) -> Self {
        Self {
            seed: parser.get_seed("SEED"),
            nightly: parser.get_bool("NIGHTLY", false),
            log_level: parser.get_log_level("LOG_LEVEL", "info"),
            protected_prefixes: parser
                .get_string_list("PROTECTED_PREFIXES", Vec::new())
                .map(merge_protected_prefixes),
            default_confdir: parser.get_optional_path("DEFAULT_CONFDIR"),
        }
    }

    /// The `EnvFilter` directive subscribers should install.
    pub fn log_directive(&self) -> String {
        super::log_directive(&self.log_level.value)
    }

    /// Fast mode trims timeouts and simplifies engines; it is on unless nightly.
    pub fn fast_mode(&self) -> bool {
        !self.nightly.value
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Sourced::default_value(Some(seed));
        self
    }

    #[must_use]
    pub fn with_nightly(mut self, nightly: bool) -> Self {
        self.nightly = Sourced::default_value(nightly);
        self
    }

    #[must_use]
    pub fn with_default_confdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_confdir = Sourced::default_value(Some(dir.into()));
        self
    }
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            seed: Sourced::default_value(None),
            nightly: Sourced::default_value(false),
            log_level: Sourced::default_value("info".to_string()),
            protected_prefixes: Sourced::default_value(default_protected_prefixes()),
            default_confdir: Sourced::default_value(None),
        }
    }
}

fn default_protected_prefixes() -> Vec<String> {
    DEFAULT_PROTECTED_PREFIXES
        .iter()
        .map(|p| (*p).to_string())
        .collect()
}

/// Configured prefixes extend the built-in ones; they never replace them.
pub fn merge_protected_prefixes(extra: Vec<String>) -> Vec<String> {
    let mut merged = default_protected_prefixes();
    for prefix in extra {
        if !merged.contains(&prefix) {
            merged.push(prefix);
        }
    }
    merged
}
