//! Configuration Module
//!
//! Handles loading engine configuration from environment variables and the
//! static per-kind freshness and priority table.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::kind::DataKind;

// == Data Kind Config ==
/// Static freshness and eviction settings for one base kind.
///
/// These four options are the whole per-kind configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DataKindConfig {
    /// Freshness window in milliseconds
    pub ttl_ms: u64,
    /// Absolute age after which an entry is hard-expired
    pub max_age_ms: u64,
    /// Entries younger than this are never evicted
    pub min_retention_ms: u64,
    /// Business importance used by the eviction score
    pub priority_weight: f64,
}

impl DataKindConfig {
    pub fn new(ttl_ms: u64, max_age_ms: u64, min_retention_ms: u64, priority_weight: f64) -> Self {
        Self {
            ttl_ms,
            max_age_ms,
            min_retention_ms,
            priority_weight,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Checks internal consistency of the settings.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.ttl_ms == 0 {
            return Err(SyncError::Config(format!("{name}: ttlMs must be positive")));
        }
        if self.max_age_ms < self.ttl_ms {
            return Err(SyncError::Config(format!(
                "{name}: maxAgeMs ({}) must not be below ttlMs ({})",
                self.max_age_ms, self.ttl_ms
            )));
        }
        if !self.priority_weight.is_finite() {
            return Err(SyncError::Config(format!(
                "{name}: priorityWeight must be finite"
            )));
        }
        Ok(())
    }
}

impl Default for DataKindConfig {
    fn default() -> Self {
        Self::new(60_000, 600_000, 30_000, 10.0)
    }
}

// == Kind Registry ==
/// Per-kind configuration lookup, keyed by base kind.
#[derive(Debug, Clone)]
pub struct KindRegistry {
    kinds: HashMap<String, DataKindConfig>,
    fallback: DataKindConfig,
}

impl KindRegistry {
    /// Creates an empty registry where every kind uses `fallback`.
    pub fn new(fallback: DataKindConfig) -> Self {
        Self {
            kinds: HashMap::new(),
            fallback,
        }
    }

    /// Registers or replaces the settings for a base kind.
    pub fn insert(&mut self, base_kind: impl Into<String>, config: DataKindConfig) {
        self.kinds.insert(base_kind.into(), config);
    }

    /// Returns the settings for a kind, falling back to the default.
    pub fn get(&self, kind: &DataKind) -> &DataKindConfig {
        self.kinds.get(kind.base()).unwrap_or(&self.fallback)
    }

    /// Returns true if the base kind has explicit settings.
    pub fn contains(&self, base_kind: &str) -> bool {
        self.kinds.contains_key(base_kind)
    }

    /// Merges overrides from a JSON object of `{ kind: { ttlMs, ... } }`.
    pub fn merge_json(&mut self, json: &str) -> Result<usize> {
        let overrides: HashMap<String, DataKindConfig> = serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("invalid kind table: {e}")))?;

        for (name, config) in &overrides {
            config.validate(name)?;
        }

        let count = overrides.len();
        self.kinds.extend(overrides);
        Ok(count)
    }

    /// Merges overrides from a JSON file.
    pub fn merge_file(&mut self, path: &Path) -> Result<usize> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        self.merge_json(&contents)
    }
}

impl Default for KindRegistry {
    /// Built-in table for the dashboard data kinds.
    fn default() -> Self {
        let mut registry = Self::new(DataKindConfig::default());
        registry.insert("appointments", DataKindConfig::new(30_000, 300_000, 60_000, 100.0));
        registry.insert("notifications", DataKindConfig::new(30_000, 180_000, 30_000, 80.0));
        registry.insert("clients", DataKindConfig::new(300_000, 1_800_000, 120_000, 60.0));
        registry.insert("staff", DataKindConfig::new(600_000, 3_600_000, 300_000, 50.0));
        registry.insert("services", DataKindConfig::new(600_000, 3_600_000, 300_000, 40.0));
        registry.insert("dashboard_stats", DataKindConfig::new(120_000, 600_000, 60_000, 20.0));
        registry
    }
}

// == Polling Config ==
/// Interval selection for the polling coordinator.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval while visible and recently used
    pub active_interval_ms: u64,
    /// Interval while hidden or idle
    pub background_interval_ms: u64,
    /// Upper bound after backoff
    pub max_interval_ms: u64,
    /// Time without interaction after which the user counts as inactive
    pub inactivity_threshold_ms: u64,
    /// Number of recent fetch outcomes used for the error rate
    pub error_window: usize,
    /// Error rate at which backoff starts
    pub backoff_error_rate: f64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_interval_ms: 15_000,
            background_interval_ms: 300_000,
            max_interval_ms: 600_000,
            inactivity_threshold_ms: 120_000,
            error_window: 10,
            backoff_error_rate: 0.3,
        }
    }
}

// == Config ==
/// Engine configuration parameters.
///
/// All scalar values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity used to compute memory pressure
    pub max_entries: usize,
    /// HTTP server port
    pub server_port: u16,
    /// Base URL of the upstream API
    pub api_base_url: String,
    /// Memory manager interval in milliseconds
    pub memory_check_interval_ms: u64,
    /// Delay before a failed optimistic update is rolled back
    pub rollback_delay_ms: u64,
    /// Lifetime of a cross-tab storage entry
    pub broadcast_cleanup_ms: u64,
    /// Outstanding fetches older than this are logged as slow
    pub slow_fetch_warn_ms: u64,
    /// Poller interval settings
    pub polling: PollingConfig,
    /// Per-kind settings
    pub kinds: KindRegistry,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_CACHE_ENTRIES` - Cache capacity (default: 100)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `API_BASE_URL` - Upstream API (default: http://localhost:8080/api)
    /// - `MEMORY_CHECK_INTERVAL_MS` - Eviction frequency (default: 30000)
    /// - `ACTIVE_POLL_INTERVAL_MS` - Foreground poll interval (default: 15000)
    /// - `BACKGROUND_POLL_INTERVAL_MS` - Background poll interval (default: 300000)
    /// - `MAX_POLL_INTERVAL_MS` - Backoff cap (default: 600000)
    /// - `INACTIVITY_THRESHOLD_MS` - Idle cutoff (default: 120000)
    /// - `ROLLBACK_DELAY_MS` - Optimistic rollback delay (default: 1000)
    /// - `BROADCAST_CLEANUP_MS` - Cross-tab entry lifetime (default: 5000)
    /// - `SLOW_FETCH_WARN_MS` - Slow fetch warning (default: 8000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let polling = PollingConfig {
            active_interval_ms: env_or("ACTIVE_POLL_INTERVAL_MS", defaults.polling.active_interval_ms),
            background_interval_ms: env_or(
                "BACKGROUND_POLL_INTERVAL_MS",
                defaults.polling.background_interval_ms,
            ),
            max_interval_ms: env_or("MAX_POLL_INTERVAL_MS", defaults.polling.max_interval_ms),
            inactivity_threshold_ms: env_or(
                "INACTIVITY_THRESHOLD_MS",
                defaults.polling.inactivity_threshold_ms,
            ),
            ..defaults.polling
        };

        Self {
            max_entries: env_or("MAX_CACHE_ENTRIES", defaults.max_entries),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            api_base_url: env::var("API_BASE_URL").unwrap_or(defaults.api_base_url),
            memory_check_interval_ms: env_or(
                "MEMORY_CHECK_INTERVAL_MS",
                defaults.memory_check_interval_ms,
            ),
            rollback_delay_ms: env_or("ROLLBACK_DELAY_MS", defaults.rollback_delay_ms),
            broadcast_cleanup_ms: env_or("BROADCAST_CLEANUP_MS", defaults.broadcast_cleanup_ms),
            slow_fetch_warn_ms: env_or("SLOW_FETCH_WARN_MS", defaults.slow_fetch_warn_ms),
            polling,
            kinds: defaults.kinds,
        }
    }

    /// Like [`Config::from_env`], additionally merging the kind table named
    /// by `SYNC_KINDS_FILE`.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_env();
        if let Ok(path) = env::var("SYNC_KINDS_FILE") {
            config.kinds.merge_file(Path::new(&path))?;
        }
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 100,
            server_port: 3000,
            api_base_url: "http://localhost:8080/api".to_string(),
            memory_check_interval_ms: 30_000,
            rollback_delay_ms: 1_000,
            broadcast_cleanup_ms: 5_000,
            slow_fetch_warn_ms: 8_000,
            polling: PollingConfig::default(),
            kinds: KindRegistry::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
