//! Source tracking for configuration values.
//!
//! Every resolved setting remembers where it came from so setup logs can
//! explain why a suite ran with a particular seed or mode.

use serde::Serialize;
use std::fmt;

/// Where a configuration value was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// Process environment variable.
    Environment,
    /// The harness config store.
    Store,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Environment => write!(f, "environment"),
            Self::Store => write!(f, "store"),
        }
    }
}

/// A value paired with its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Environment variable the value was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
    /// Store key the value was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_key: Option<String>,
}

impl<T> Sourced<T> {
    pub fn from_env(value: T, var_name: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            env_var: Some(var_name.into()),
            store_key: None,
        }
    }

    pub fn from_store(value: T, key: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Store,
            env_var: None,
            store_key: Some(key.into()),
        }
    }

    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            env_var: None,
            store_key: None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            env_var: self.env_var,
            store_key: self.store_key,
        }
    }

    /// Human-readable origin, e.g. `environment (SLH_SEED)`.
    pub fn describe_source(&self) -> String {
        match (&self.env_var, &self.store_key) {
            (Some(var), _) => format!("{} ({var})", self.source),
            (None, Some(key)) => format!("{} ({key})", self.source),
            (None, None) => self.source.to_string(),
        }
    }
}
