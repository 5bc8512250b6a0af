//! Redis connection configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Redis fast gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Prepended to every key, so several deployments can share one Redis
    pub key_prefix: String,
    /// Upper bound on any single Redis round trip
    pub operation_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "seatgate:".to_string(),
            operation_timeout: Duration::from_millis(250),
        }
    }
}

impl RedisConfig {
    /// Load from `REDIS_*` environment variables, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `REDIS_URL` | `redis://127.0.0.1:6379` |
    /// | `REDIS_KEY_PREFIX` | `seatgate:` |
    /// | `REDIS_OPERATION_TIMEOUT_MS` | 250 |
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env::var("REDIS_URL").unwrap_or(defaults.url),
            key_prefix: env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            operation_timeout: env::var("REDIS_OPERATION_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.operation_timeout, Duration::from_millis),
        }
    }

    /// Use a different connection URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Use a different key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}
