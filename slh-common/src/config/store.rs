//! The key-value config store the harness writes suite overrides into.
//!
//! The store stands in for process-wide system properties: the harness
//! reads force-failure flags and the time budget from it, writes seeded
//! overrides into it, and snapshots/restores it around suites and tests.

use super::parse_bool_flag;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::warn;

/// Errors raised by a config store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The key is pinned and rejects writes.
    #[error("config key '{key}' is read-only")]
    ReadOnly { key: String },

    /// Backend-specific rejection.
    #[error("config store rejected '{key}': {message}")]
    Rejected { key: String, message: String },
}

/// Point-in-time copy of every entry in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    entries: BTreeMap<String, String>,
}

impl StoreSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// External key-value configuration store.
pub trait ConfigStore: Send + Sync {
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Option<String>;

    fn remove(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn snapshot(&self) -> StoreSnapshot;

    /// Replace the store contents with `snapshot`.
    fn restore(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError>;

    /// Read a boolean flag, falling back to `default` when unset or unparsable.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(raw) => parse_bool_flag(&raw).unwrap_or_else(|| {
                warn!(key, value = %raw, "ignoring non-boolean config value");
                default
            }),
            None => default,
        }
    }

    /// Read an unsigned integer, falling back to `default` when unset or unparsable.
    fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.get(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(key, value = %raw, "ignoring non-numeric config value");
                default
            }),
            None => default,
        }
    }
}

/// In-memory store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<BTreeMap<String, String>>,
    read_only: BTreeSet<String>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with initial entries.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            read_only: BTreeSet::new(),
        }
    }

    /// Pin `key` so that every write to it fails.
    #[must_use]
    pub fn with_read_only(mut self, key: impl Into<String>) -> Self {
        self.read_only.insert(key.into());
        self
    }

    fn check_writable(&self, key: &str) -> Result<(), StoreError> {
        if self.read_only.contains(key) {
            return Err(StoreError::ReadOnly {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

impl ConfigStore for MemoryConfigStore {
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_writable(key)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remove(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_writable(key)?;
        Ok(self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key))
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            entries: self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    fn restore(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        // Read-only keys cannot have changed since the snapshot, so a wholesale swap is safe.
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = snapshot.entries.clone();
        Ok(())
    }
}
