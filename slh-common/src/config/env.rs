//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for SLH environment variables with
//! validation, error collection, and source tracking.

use super::source::Sourced;
use super::{log_directive, parse_bool_flag, parse_seed_str};
use std::env;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Neither a log level nor a valid filter directive.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a new parser with the SLH_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "SLH_",
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a boolean value with default.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let parsed = match parse_bool_flag(&value) {
                    Some(flag) => flag,
                    None => {
                        self.errors.push(EnvError::InvalidValue {
                            var: var_name.clone(),
                            expected: "boolean (true/false/1/0/yes/no)".to_string(),
                            value: value.clone(),
                        });
                        default
                    }
                };
                Sourced::from_env(parsed, var_name)
            }
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a suite seed, written as decimal or `0x`-prefixed hex.
    ///
    /// Unset or empty yields `None` so the caller can draw a fresh seed.
    pub fn get_seed(&mut self, name: &str) -> Sourced<Option<u64>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.trim().is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => match parse_seed_str(&value) {
                Some(seed) => Sourced::from_env(Some(seed), var_name),
                None => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "seed (decimal or 0x-prefixed hex u64)".to_string(),
                        value,
                    });
                    Sourced::default_value(None)
                }
            },
            Err(_) => Sourced::default_value(None),
        }
    }

    /// Get a log filter: a bare level or a full `EnvFilter` directive.
    ///
    /// An invalid value is recorded and the default is used instead.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        let Ok(value) = env::var(&var_name) else {
            return Sourced::default_value(default.to_string());
        };
        let value = value.trim().to_string();
        if !value.is_empty() && EnvFilter::try_new(log_directive(&value)).is_ok() {
            return Sourced::from_env(value, var_name);
        }
        self.errors.push(EnvError::InvalidLogLevel {
            var: var_name,
            value,
        });
        Sourced::default_value(default.to_string())
    }

    /// Get a comma-separated list of strings.
    pub fn get_string_list(&mut self, name: &str, default: Vec<String>) -> Sourced<Vec<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(Vec::new(), var_name),
            Ok(value) => {
                let items: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Sourced::from_env(items, var_name)
            }
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get an optional path with `~/` expanded against the home directory.
    ///
    /// Unset or empty yields `None`. Existence is left to the caller.
    pub fn get_optional_path(&mut self, name: &str) -> Sourced<Option<PathBuf>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.trim().is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => Sourced::from_env(Some(expand_home(value.trim())), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }
}

fn expand_home(value: &str) -> PathBuf {
    if value == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(value));
    }
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, env_test_lock};
    use crate::test_guard;

    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: Tests are serialized via env_test_lock
            unsafe { env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: Tests are serialized via env_test_lock
        unsafe { env::set_var(key, value) };
    }

    #[test]
    fn test_get_bool_true_values() {
        let _guard = test_guard!();
        let _env = env_test_lock();
        let vars = ["SLH_TEST_BOOL_TRUE"];
        cleanup_env(&vars);

        for val in &["1", "true", "yes", "on", "TRUE", "Yes"] {
            set_env("SLH_TEST_BOOL_TRUE", val);
            let mut parser = EnvParser::new();
            let result = parser.get_bool("TEST_BOOL_TRUE", false);
            assert!(result.value, "Expected true for '{}'", val);
            assert!(!parser.has_errors());
        }

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_bool_false_values() {
        let _guard = test_guard!();
        let _env = env_test_lock();
        let vars = ["SLH_TEST_BOOL_FALSE"];
        cleanup_env(&vars);

        for val in &["0", "false", "no", "off", "FALSE", ""] {
            set_env("SLH_TEST_BOOL_FALSE", val);
            let mut parser = EnvParser::new();
            let result = parser.get_bool("TEST_BOOL_FALSE", true);
            assert!(!result.value, "Expected false for '{}'", val);
            assert!(!parser.has_errors());
        }

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_bool_invalid_uses_default() {
        let _guard = test_guard!();
        let _env = env_test_lock();
        let vars = ["SLH_BAD_BOOL"];
        cleanup_env(&vars);

        set_env("SLH_BAD_BOOL", "maybe");
        let mut parser = EnvParser::new();
        let result = parser.get_bool("BAD_BOOL", false);
        assert!(!result.value);
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_seed_decimal_and_hex() {
        let _guard = test_guard!();
        let _env = env_test_lock();
        let vars = ["SLH_TEST_SEED"];
        cleanup_env(&vars);

        set_env("SLH_TEST_SEED", "12345");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_seed("TEST_SEED").value, Some(12345));

        set_env("SLH_TEST_SEED", "0xDEADBEEF");
        let mut parser = EnvParser::new();
        let seed = parser.get_seed("TEST_SEED");
        assert_eq!(seed.value, Some(0xDEAD_BEEF));
        assert_eq!(seed.source, ConfigSource::Environment);
        assert!(!parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_seed_invalid_records_error() {
        let _guard = test_guard!();
        let _env = env_test_lock();
        let vars = ["SLH_TEST_SEED_BAD"];
        cleanup_env(&vars);

        set_env("SLH_TEST_SEED_BAD", "not-a-seed");
        let mut parser = EnvParser::new();
        let seed = parser.get_seed("TEST_SEED_BAD");
        assert_eq!(seed.value, None);
        assert!(parser.has_errors());

        // Unset means "draw a fresh one", not an error
        cleanup_env(&vars);
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_seed("TEST_SEED_BAD").value, None);
        assert!(!parser.has_errors());
    }

    #[test]
    fn test_get_log_level_accepts_levels_and_directives() {
        let _guard = test_guard!();
        let _env = env_test_lock();
        let vars = ["SLH_TEST_LOG_LEVEL"];
        cleanup_env(&vars);

        for value in ["debug", "WARN", "slh_common=debug", "slh_common::harness=trace,warn"] {
            set_env("SLH_TEST_LOG_LEVEL", value);
            let mut parser = EnvParser::new();
            let level = parser.get_log_level("TEST_LOG_LEVEL", "info");
            assert!(!parser.has_errors(), "rejected '{value}'");
            assert_eq!(level.value, value);
            assert_eq!(level.env_var.as_deref(), Some("SLH_TEST_LOG_LEVEL"));
        }

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_log_level_invalid_falls_back() {
        let _guard = test_guard!();
        let _env = env_test_lock();
        let vars = ["SLH_TEST_LOG_LEVEL_BAD"];
        cleanup_env(&vars);

        set_env("SLH_TEST_LOG_LEVEL_BAD", "slh_common=chatty");
        let mut parser = EnvParser::new();
        let result = parser.get_log_level("TEST_LOG_LEVEL_BAD", "info");
        assert!(matches!(parser.errors()[0], EnvError::InvalidLogLevel { .. }));
        assert_eq!(result.value, "info");
        assert_eq!(result.source, ConfigSource::Default);

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_string_list() {
        let _guard = test_guard!();
        let _env = env_test_lock();
        let vars = ["SLH_TEST_LIST"];
        cleanup_env(&vars);

        set_env("SLH_TEST_LIST", "SUITE, tracing-appender,,");
        let mut parser = EnvParser::new();
        let result = parser.get_string_list("TEST_LIST", vec![]);
        assert_eq!(result.value, vec!["SUITE", "tracing-appender"]);

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_optional_path_expands_home() {
        let _guard = test_guard!();
        let _env = env_test_lock();
        let vars = ["SLH_TEST_CONFDIR"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new();
        let unset = parser.get_optional_path("TEST_CONFDIR");
        assert_eq!(unset.value, None);
        assert_eq!(unset.source, ConfigSource::Default);

        set_env("SLH_TEST_CONFDIR", "/opt/configsets/_default");
        let mut parser = EnvParser::new();
        assert_eq!(
            parser.get_optional_path("TEST_CONFDIR").value,
            Some(PathBuf::from("/opt/configsets/_default"))
        );

        if let Some(home) = dirs::home_dir() {
            set_env("SLH_TEST_CONFDIR", "~/conf/_default");
            let mut parser = EnvParser::new();
            let path = parser.get_optional_path("TEST_CONFDIR");
            assert_eq!(path.value, Some(home.join("conf/_default")));
            assert_eq!(path.source, ConfigSource::Environment);
        }

        set_env("SLH_TEST_CONFDIR", "  ");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_optional_path("TEST_CONFDIR").value, None);
        assert!(!parser.has_errors());

        cleanup_env(&vars);
    }

    mod proptest_env_parsing {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn test_env_parser_get_bool(value in "[a-zA-Z0-9_-]{0,20}") {
                let _env = env_test_lock();
                let var = "SLH_PROPTEST_BOOL";
                cleanup_env(&[var]);

                set_env(var, &value);
                let mut parser = EnvParser::new();
                let result = parser.get_bool("PROPTEST_BOOL", false);
                prop_assert_eq!(result.value, parse_bool_flag(&value).unwrap_or(false));
                prop_assert_eq!(parser.has_errors(), parse_bool_flag(&value).is_none());

                cleanup_env(&[var]);
            }

            #[test]
            fn test_env_parser_get_seed_never_panics(value in ".{0,40}") {
                let _env = env_test_lock();
                let var = "SLH_PROPTEST_SEED";
                cleanup_env(&[var]);

                if !value.contains('\0') {
                    set_env(var, &value);
                    let mut parser = EnvParser::new();
                    let _ = parser.get_seed("PROPTEST_SEED");
                }

                cleanup_env(&[var]);
            }
        }
    }
}
