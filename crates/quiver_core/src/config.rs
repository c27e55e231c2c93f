//! Database and namespace configuration.

use crate::error::{CoreError, CoreResult};
use crate::replication::DEFAULT_SUBSCRIBER_QUEUE_CAPACITY;
use crate::types::ServerId;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Namespace name that selects the default entry of a [`ConfigProvider`].
pub const DEFAULT_NAMESPACE_KEY: &str = "*";

/// Per-namespace tunables.
///
/// The copy-policy fields decide when a transaction commit builds a fresh
/// namespace implementation instead of mutating the published one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Minimum transaction size (in steps) that may trigger a copy.
    pub start_copy_policy_tx_size: u32,

    /// A copy happens when `items <= multiplier * steps`.
    pub copy_policy_multiplier: u32,

    /// Transactions at least this large are always committed through a copy.
    pub tx_size_to_always_copy: u32,

    /// Maximum number of records kept in the namespace's local WAL.
    pub wal_size: usize,

    /// Number of items per full-snapshot chunk.
    pub snapshot_chunk_size: usize,

    /// Upper bound on invalidation retries of a single facade call.
    pub max_invalidation_retries: u32,

    /// How often blocking waits re-check their mutation context.
    pub cond_check_interval_ms: u64,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            start_copy_policy_tx_size: 10_000,
            copy_policy_multiplier: 5,
            tx_size_to_always_copy: 100_000,
            wal_size: 4_000_000,
            snapshot_chunk_size: 500,
            max_invalidation_retries: 100_000,
            cond_check_interval_ms: 20,
        }
    }
}

impl NamespaceConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum transaction size that may trigger a copy.
    #[must_use]
    pub const fn start_copy_policy_tx_size(mut self, value: u32) -> Self {
        self.start_copy_policy_tx_size = value;
        self
    }

    /// Sets the copy policy multiplier.
    #[must_use]
    pub const fn copy_policy_multiplier(mut self, value: u32) -> Self {
        self.copy_policy_multiplier = value;
        self
    }

    /// Sets the transaction size above which commits always copy.
    #[must_use]
    pub const fn tx_size_to_always_copy(mut self, value: u32) -> Self {
        self.tx_size_to_always_copy = value;
        self
    }

    /// Sets the local WAL capacity.
    #[must_use]
    pub const fn wal_size(mut self, value: usize) -> Self {
        self.wal_size = value;
        self
    }

    /// Sets the number of items per snapshot chunk.
    #[must_use]
    pub const fn snapshot_chunk_size(mut self, value: usize) -> Self {
        self.snapshot_chunk_size = value;
        self
    }

    /// Sets the invalidation retry bound.
    #[must_use]
    pub const fn max_invalidation_retries(mut self, value: u32) -> Self {
        self.max_invalidation_retries = value;
        self
    }

    /// Sets the cancellation polling interval in milliseconds.
    #[must_use]
    pub const fn cond_check_interval_ms(mut self, value: u64) -> Self {
        self.cond_check_interval_ms = value;
        self
    }

    /// Returns the cancellation polling interval.
    #[must_use]
    pub fn cond_check_interval(&self) -> Duration {
        Duration::from_millis(self.cond_check_interval_ms)
    }
}

/// Configuration for a database instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server id stamped into LSNs and marked WAL records.
    pub server_id: ServerId,

    /// Defaults applied to namespaces without an explicit override.
    pub namespace: NamespaceConfig,

    /// Whether the journal is flushed after every appended record.
    pub journal_sync_on_write: bool,

    /// Records an update subscription may queue before dropping the oldest.
    pub subscriber_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_id: ServerId::new(0),
            namespace: NamespaceConfig::default(),
            journal_sync_on_write: true,
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server id.
    #[must_use]
    pub const fn server_id(mut self, id: ServerId) -> Self {
        self.server_id = id;
        self
    }

    /// Sets the default namespace configuration.
    #[must_use]
    pub fn namespace(mut self, config: NamespaceConfig) -> Self {
        self.namespace = config;
        self
    }

    /// Sets whether the journal syncs after every record.
    #[must_use]
    pub const fn journal_sync_on_write(mut self, value: bool) -> Self {
        self.journal_sync_on_write = value;
        self
    }

    /// Sets the queue capacity of update subscriptions.
    #[must_use]
    pub const fn subscriber_queue_capacity(mut self, value: usize) -> Self {
        self.subscriber_queue_capacity = value;
        self
    }
}

/// Source of namespace configuration, handed to config-update callbacks.
///
/// Holds per-namespace overrides plus a default entry keyed by `"*"`.
#[derive(Debug, Clone, Default)]
pub struct ConfigProvider {
    default: NamespaceConfig,
    overrides: HashMap<String, NamespaceConfig>,
}

#[derive(Deserialize)]
struct NamespaceConfigEntry {
    namespace: String,
    #[serde(flatten)]
    config: NamespaceConfig,
}

#[derive(Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    namespaces: Vec<NamespaceConfigEntry>,
}

impl ConfigProvider {
    /// Creates a provider that returns `default` for every namespace.
    #[must_use]
    pub fn new(default: NamespaceConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Parses a provider from a JSON document of the form
    /// `{"namespaces": [{"namespace": "*", ...}, {"namespace": "items", ...}]}`.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let doc: ConfigDocument = serde_json::from_str(json)
            .map_err(|e| CoreError::params(format!("malformed namespaces config: {e}")))?;
        let mut provider = Self::default();
        for entry in doc.namespaces {
            provider = provider.with_namespace(entry.namespace, entry.config);
        }
        Ok(provider)
    }

    /// Adds an override for one namespace, or replaces the default for `"*"`.
    #[must_use]
    pub fn with_namespace(mut self, name: impl Into<String>, config: NamespaceConfig) -> Self {
        let name = name.into();
        if name == DEFAULT_NAMESPACE_KEY {
            self.default = config;
        } else {
            self.overrides.insert(name, config);
        }
        self
    }

    /// Returns the configuration that applies to `name`.
    #[must_use]
    pub fn get_namespace_config(&self, name: &str) -> NamespaceConfig {
        self.overrides
            .get(name)
            .unwrap_or(&self.default)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.server_id, ServerId::new(0));
        assert_eq!(config.namespace.start_copy_policy_tx_size, 10_000);
        assert_eq!(config.namespace.copy_policy_multiplier, 5);
        assert_eq!(config.namespace.tx_size_to_always_copy, 100_000);
        assert_eq!(config.subscriber_queue_capacity, DEFAULT_SUBSCRIBER_QUEUE_CAPACITY);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .server_id(ServerId::new(3))
            .namespace(NamespaceConfig::new().wal_size(16).start_copy_policy_tx_size(2))
            .journal_sync_on_write(false);

        assert_eq!(config.server_id, ServerId::new(3));
        assert_eq!(config.namespace.wal_size, 16);
        assert_eq!(config.namespace.start_copy_policy_tx_size, 2);
        assert!(!config.journal_sync_on_write);
    }

    #[test]
    fn provider_from_json() {
        let provider = ConfigProvider::from_json(
            r#"{"namespaces": [
                {"namespace": "*", "start_copy_policy_tx_size": 100},
                {"namespace": "items", "copy_policy_multiplier": 9, "tx_size_to_always_copy": 50}
            ]}"#,
        )
        .unwrap();

        let items = provider.get_namespace_config("items");
        assert_eq!(items.copy_policy_multiplier, 9);
        assert_eq!(items.tx_size_to_always_copy, 50);
        assert_eq!(items.start_copy_policy_tx_size, 10_000);

        let other = provider.get_namespace_config("other");
        assert_eq!(other.start_copy_policy_tx_size, 100);
    }

    #[test]
    fn provider_rejects_garbage() {
        let err = ConfigProvider::from_json("{").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Params);
    }
}
