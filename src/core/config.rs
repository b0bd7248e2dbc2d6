//! Engine configuration
//!
//! Connection target, pool bounds and the statement logging toggle. Both structs
//! deserialize with defaults for every missing field, so a partial config document works.

use super::database_types::DatabaseType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage path that selects a private in-memory database
pub const IN_MEMORY: &str = ":memory:";

/// Connection pool bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of pooled connections
    pub max: usize,
    /// Connections opened eagerly at connect time
    pub min: usize,
    /// Idle connections older than this are released by `reap_idle`
    pub idle_timeout_ms: u64,
    /// How long an operation waits for a free connection
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max: 5,
            min: 0,
            idle_timeout_ms: 10_000,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl PoolSettings {
    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Acquire timeout as a duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Storage engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dialect; only `sqlite` connects
    pub dialect: DatabaseType,
    /// Host name (unused by file-backed engines)
    pub host: String,
    /// Database name (unused by file-backed engines)
    pub database: String,
    /// User name (unused by file-backed engines)
    pub username: String,
    /// Password (unused by file-backed engines)
    pub password: String,
    /// Database file path, or `:memory:`
    pub storage: String,
    /// Pool bounds
    pub pool: PoolSettings,
    /// Log every statement at info level instead of trace
    pub logging: bool,
    /// Turn on SQLite foreign-key enforcement for every connection
    pub enforce_foreign_keys: bool,
    /// Per-statement timeout
    pub operation_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect: DatabaseType::Sqlite,
            host: "localhost".to_string(),
            database: "database".to_string(),
            username: String::new(),
            password: String::new(),
            storage: IN_MEMORY.to_string(),
            pool: PoolSettings::default(),
            logging: false,
            enforce_foreign_keys: true,
            operation_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// SQLite configuration for the given storage path
    pub fn sqlite(storage: impl Into<String>) -> Self {
        Self {
            storage: storage.into(),
            ..Default::default()
        }
    }

    /// Set pool bounds
    #[must_use]
    pub fn with_pool(mut self, max: usize, min: usize, idle_timeout: Duration) -> Self {
        self.pool.max = max;
        self.pool.min = min;
        self.pool.idle_timeout_ms = idle_timeout.as_millis() as u64;
        self
    }

    /// Set the acquire timeout
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the per-statement timeout
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Toggle statement logging
    #[must_use]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Toggle foreign-key enforcement
    #[must_use]
    pub fn with_foreign_keys(mut self, enforce: bool) -> Self {
        self.enforce_foreign_keys = enforce;
        self
    }

    /// Per-statement timeout as a duration
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Whether the storage is a private in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.storage.is_empty() || self.storage == IN_MEMORY
    }
}
