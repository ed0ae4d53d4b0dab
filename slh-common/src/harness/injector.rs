//! Seeded, suite-scoped configuration overrides.
//!
//! Every suite gets a small base set (test-mode switches plus a few
//! seed-drawn toggles). Fast mode adds the aggressive catalog below:
//! short timeouts, single retries, in-memory storage, quick scheduler
//! cadence, small buffers, and expensive subsystems switched off.

use super::context::{SuiteSeed, draw_bool, draw_chance, draw_u64};
use crate::config::{ConfigStore, StoreError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Which family of knobs an override belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverrideCategory {
    NetworkTimeout,
    Retry,
    StorageEngine,
    SchedulerCadence,
    Buffering,
    Subsystem,
    TestMode,
}

impl fmt::Display for OverrideCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NetworkTimeout => "network-timeout",
            Self::Retry => "retry",
            Self::StorageEngine => "storage-engine",
            Self::SchedulerCadence => "scheduler-cadence",
            Self::Buffering => "buffering",
            Self::Subsystem => "subsystem",
            Self::TestMode => "test-mode",
        };
        f.write_str(name)
    }
}

/// One runtime knob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigOverride {
    pub key: String,
    pub value: String,
    pub category: OverrideCategory,
}

impl ConfigOverride {
    fn new(key: &str, value: impl Into<String>, category: OverrideCategory) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
            category,
        }
    }
}

use OverrideCategory::{
    Buffering, NetworkTimeout, Retry, SchedulerCadence, StorageEngine, Subsystem, TestMode,
};

/// Chance the update log is enabled in any given suite.
const UPDATE_LOG_CHANCE: f64 = 0.9;

/// Overrides applied only in fast mode. Keys are unique.
const FAST_MODE_CATALOG: &[(&str, &str, OverrideCategory)] = &[
    ("net.socket_timeout_ms", "30000", NetworkTimeout),
    ("net.connect_timeout_ms", "10000", NetworkTimeout),
    ("net.distrib_update_socket_timeout_ms", "10000", NetworkTimeout),
    ("net.default_socket_timeout_ms", "15000", NetworkTimeout),
    ("net.default_connect_timeout_ms", "10000", NetworkTimeout),
    ("net.commit_socket_timeout_ms", "15000", NetworkTimeout),
    ("net.http_client_connect_timeout_ms", "10000", NetworkTimeout),
    ("net.http_client_socket_timeout_ms", "15000", NetworkTimeout),
    ("net.index_fetch_socket_timeout_ms", "15000", NetworkTimeout),
    ("net.collection_op_timeout_ms", "15000", NetworkTimeout),
    ("net.dependent_update_timeout_secs", "1", NetworkTimeout),
    ("net.prep_recovery_extra_wait_ms", "0", NetworkTimeout),
    ("net.leader_vote_wait_ms", "5000", NetworkTimeout),
    ("net.leader_conflict_resolve_wait_ms", "10000", NetworkTimeout),
    ("net.bucket_version_lock_timeout_ms", "8000", NetworkTimeout),
    ("net.wait_for_state_secs", "5", NetworkTimeout),
    ("net.collection_active_wait_secs", "10", NetworkTimeout),
    ("net.coordination_shutdown_timeout_ms", "10", NetworkTimeout),
    ("net.validate_after_inactivity_ms", "-1", NetworkTimeout),
    ("retry.http_client", "1", Retry),
    ("retry.on_forward", "1", Retry),
    ("retry.to_followers", "1", Retry),
    ("retry.recovery_throttle_ms", "250", Retry),
    ("retry.recovery_leader_throttle_ms", "50", Retry),
    ("retry.leader_throttle", "0", Retry),
    ("retry.recovery_throttle", "0", Retry),
    ("storage.directory_factory", "ram", StorageEngine),
    ("storage.lock_type", "single", StorageEngine),
    ("storage.test_lock_type", "single", StorageEngine),
    ("storage.merge_policy", "none", StorageEngine),
    ("storage.merge_scheduler", "concurrent", StorageEngine),
    ("storage.codec", "schema", StorageEngine),
    ("storage.compression_mode", "best_compression", StorageEngine),
    ("storage.merge_core_count", "2", StorageEngine),
    ("storage.merge_spins", "false", StorageEngine),
    ("scheduler.state_update_delay_ms", "1000", SchedulerCadence),
    ("scheduler.trigger_cooldown_secs", "1", SchedulerCadence),
    ("scheduler.action_throttle_secs", "1", SchedulerCadence),
    ("scheduler.trigger_pool_size", "2", SchedulerCadence),
    ("scheduler.core_creation_max_delay_secs", "2", SchedulerCadence),
    ("scheduler.stale_state_pause_ms", "0", SchedulerCadence),
    ("scheduler.starting_recovery_delay_ms", "0", SchedulerCadence),
    ("scheduler.coordination_selector_threads", "1", SchedulerCadence),
    ("scheduler.coordination_worker_threads", "3", SchedulerCadence),
    ("scheduler.commit_processor_threads", "1", SchedulerCadence),
    ("scheduler.max_container_threads", "300", SchedulerCadence),
    ("scheduler.min_container_threads", "20", SchedulerCadence),
    ("scheduler.low_container_threads_threshold", "-1", SchedulerCadence),
    ("buffer.max_buffered_docs", "1000000", Buffering),
    ("buffer.ram_buffer_mb", "20", Buffering),
    ("buffer.ram_per_thread_hard_limit_mb", "4", Buffering),
    ("buffer.http_max_pool_size", "6", Buffering),
    ("buffer.http_pool_keepalive_ms", "5000", Buffering),
    ("subsystem.jmx_reporter_enabled", "false", Subsystem),
    ("subsystem.commit_on_close", "false", Subsystem),
    ("subsystem.default_config_bootstrap", "false", Subsystem),
    ("subsystem.public_key_handler_enabled", "false", Subsystem),
    ("subsystem.coordination_acl_enabled", "false", Subsystem),
];

/// Computes and writes the suite's override set.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigInjector;

impl ConfigInjector {
    /// The full ordered override set for `(seed, fast_mode)`.
    ///
    /// Depends on nothing but its arguments, so the same inputs always
    /// produce the same list.
    pub fn overrides(seed: SuiteSeed, fast_mode: bool) -> Vec<ConfigOverride> {
        let mut rng = seed.stream("config-injector");
        let update_log = draw_chance(&mut rng, UPDATE_LOG_CHANCE);
        let shard_seed = draw_u64(&mut rng) as i64;
        let range_versions = draw_bool(&mut rng);

        let mut overrides = vec![
            ConfigOverride::new("client.session_timeout_ms", "30000", TestMode),
            ConfigOverride::new("api.v2_real_path", "true", TestMode),
            ConfigOverride::new("coordination.force_sync", "no", TestMode),
            ConfigOverride::new("server.test_mode", "true", TestMode),
            ConfigOverride::new("update_log.enabled", update_log.to_string(), Subsystem),
            ConfigOverride::new("shard_handler.random_seed", shard_seed.to_string(), TestMode),
            ConfigOverride::new("clustering.enabled", "false", Subsystem),
            ConfigOverride::new(
                "peer_sync.use_range_versions",
                range_versions.to_string(),
                Subsystem,
            ),
            ConfigOverride::new("coordination.direct_buffer_bytes", "131072", Buffering),
        ];

        if fast_mode {
            overrides.extend(
                FAST_MODE_CATALOG
                    .iter()
                    .map(|(key, value, category)| ConfigOverride::new(key, *value, *category)),
            );
        }
        overrides
    }

    /// Write the override set into `store`, in order.
    ///
    /// Stops at the first rejected write. The caller owns rollback.
    pub fn apply(
        store: &dyn ConfigStore,
        seed: SuiteSeed,
        fast_mode: bool,
    ) -> Result<Vec<ConfigOverride>, StoreError> {
        let overrides = Self::overrides(seed, fast_mode);
        for o in &overrides {
            store.set(&o.key, &o.value)?;
            debug!(key = %o.key, value = %o.value, category = %o.category, "applied override");
        }
        info!(count = overrides.len(), fast_mode, %seed, "applied config overrides");
        Ok(overrides)
    }
}
