//! Engine configuration.
//!
//! Loads from `SEATGATE_*` environment variables with defaults, or is built in
//! code with the `with_*` methods.
//!
//! | Variable | Default |
//! |---|---|
//! | `SEATGATE_MAX_ATTEMPTS` | 3 |
//! | `SEATGATE_RETRY_JITTER_MS` | 0 |
//! | `SEATGATE_PROVISIONAL_TTL_SECS` | 30 |
//! | `SEATGATE_GATE_TIMEOUT_MS` | 50 |
//! | `SEATGATE_RECONCILE_INTERVAL_SECS` | 10 |
//! | `SEATGATE_FALLBACK_ON_GATE_ERROR` | true |
//! | `SEATGATE_HEALTH_WINDOW_SECS` | 10 |
//! | `SEATGATE_HEALTH_MIN_SAMPLES` | 20 |
//! | `SEATGATE_ERROR_RATE_THRESHOLD` | 0.5 |
//! | `SEATGATE_SLOW_CALL_MS` | 100 |
//! | `SEATGATE_RECOVERY_COOLDOWN_SECS` | 30 |
//! | `SEATGATE_PROBE_INTERVAL_MS` | 1000 |
//! | `SEATGATE_CACHE_TTL_SECS` | 300 |
//! | `SEATGATE_CACHE_CAPACITY` | 1024 |

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is outside its allowed range.
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Thresholds that decide when the fast gate is bypassed and restored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationConfig {
    /// Sliding window over which gate health is measured
    pub window: Duration,
    /// Samples required in the window before tripping
    pub min_samples: usize,
    /// Unhealthy fraction (errors plus slow calls) that trips the gate
    pub error_rate_threshold: f64,
    /// Calls slower than this count as unhealthy
    pub slow_call_threshold: Duration,
    /// Continuous health required before the gate is restored
    pub cooldown: Duration,
    /// Probe cadence while bypassed
    pub probe_interval: Duration,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            min_samples: 20,
            error_rate_threshold: 0.5,
            slow_call_threshold: Duration::from_millis(100),
            cooldown: Duration::from_secs(30),
            probe_interval: Duration::from_secs(1),
        }
    }
}

/// Availability cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime
    pub ttl: Duration,
    /// Maximum entries before least-recently-used eviction
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            capacity: 1024,
        }
    }
}

/// Allocation engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Optimistic allocator retry policy
    pub retry: RetryPolicy,
    /// Lifetime of a provisional hold in the fast gate
    pub provisional_ttl: Duration,
    /// Bound on every fast gate call
    pub gate_timeout: Duration,
    /// Reconciler cadence
    pub reconcile_interval: Duration,
    /// Serve requests through the optimistic allocator when the gate errors
    pub fallback_on_gate_error: bool,
    /// Gate health thresholds
    pub degradation: DegradationConfig,
    /// Availability cache sizing
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            provisional_ttl: Duration::from_secs(30),
            gate_timeout: Duration::from_millis(50),
            reconcile_interval: Duration::from_secs(10),
            fallback_on_gate_error: true,
            degradation: DegradationConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map_or(default, Duration::from_millis)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map_or(default, Duration::from_secs)
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry: RetryPolicy::builder()
                .max_attempts(env_or("SEATGATE_MAX_ATTEMPTS", defaults.retry.max_attempts))
                .jitter(env_millis("SEATGATE_RETRY_JITTER_MS", defaults.retry.jitter))
                .build(),
            provisional_ttl: env_secs("SEATGATE_PROVISIONAL_TTL_SECS", defaults.provisional_ttl),
            gate_timeout: env_millis("SEATGATE_GATE_TIMEOUT_MS", defaults.gate_timeout),
            reconcile_interval: env_secs(
                "SEATGATE_RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval,
            ),
            fallback_on_gate_error: env_or(
                "SEATGATE_FALLBACK_ON_GATE_ERROR",
                defaults.fallback_on_gate_error,
            ),
            degradation: DegradationConfig {
                window: env_secs("SEATGATE_HEALTH_WINDOW_SECS", defaults.degradation.window),
                min_samples: env_or(
                    "SEATGATE_HEALTH_MIN_SAMPLES",
                    defaults.degradation.min_samples,
                ),
                error_rate_threshold: env_or(
                    "SEATGATE_ERROR_RATE_THRESHOLD",
                    defaults.degradation.error_rate_threshold,
                ),
                slow_call_threshold: env_millis(
                    "SEATGATE_SLOW_CALL_MS",
                    defaults.degradation.slow_call_threshold,
                ),
                cooldown: env_secs(
                    "SEATGATE_RECOVERY_COOLDOWN_SECS",
                    defaults.degradation.cooldown,
                ),
                probe_interval: env_millis(
                    "SEATGATE_PROBE_INTERVAL_MS",
                    defaults.degradation.probe_interval,
                ),
            },
            cache: CacheConfig {
                ttl: env_secs("SEATGATE_CACHE_TTL_SECS", defaults.cache.ttl),
                capacity: env_or("SEATGATE_CACHE_CAPACITY", defaults.cache.capacity),
            },
        }
    }

    /// Set the allocator retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the provisional hold lifetime.
    #[must_use]
    pub const fn with_provisional_ttl(mut self, ttl: Duration) -> Self {
        self.provisional_ttl = ttl;
        self
    }

    /// Set the fast gate call timeout.
    #[must_use]
    pub const fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = timeout;
        self
    }

    /// Set the reconciler cadence.
    #[must_use]
    pub const fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Enable or disable the optimistic fallback on gate errors.
    #[must_use]
    pub const fn with_fallback_on_gate_error(mut self, fallback: bool) -> Self {
        self.fallback_on_gate_error = fallback;
        self
    }

    /// Set the degradation thresholds.
    #[must_use]
    pub const fn with_degradation(mut self, degradation: DegradationConfig) -> Self {
        self.degradation = degradation;
        self
    }

    /// Set the availability cache sizing.
    #[must_use]
    pub const fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.retry.max_attempts == 0 {
            return invalid("max_attempts", "must be at least 1");
        }
        if self.provisional_ttl.is_zero() {
            return invalid("provisional_ttl", "must be positive");
        }
        if self.gate_timeout.is_zero() {
            return invalid("gate_timeout", "must be positive");
        }
        if self.reconcile_interval.is_zero() {
            return invalid("reconcile_interval", "must be positive");
        }
        let d = &self.degradation;
        if d.window.is_zero() {
            return invalid("degradation.window", "must be positive");
        }
        if d.min_samples == 0 {
            return invalid("degradation.min_samples", "must be at least 1");
        }
        if !(d.error_rate_threshold > 0.0 && d.error_rate_threshold <= 1.0) {
            return invalid("degradation.error_rate_threshold", "must be in (0, 1]");
        }
        if d.probe_interval.is_zero() {
            return invalid("degradation.probe_interval", "must be positive");
        }
        if self.cache.capacity == 0 {
            return invalid("cache.capacity", "must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.provisional_ttl, Duration::from_secs(30));
        assert!(config.fallback_on_gate_error);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = EngineConfig::default()
            .with_retry(RetryPolicy::builder().max_attempts(0).build());
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "max_attempts",
                reason: "must be at least 1".into(),
            })
        );
    }

    #[test]
    fn error_rate_must_be_a_fraction() {
        let config = EngineConfig::default().with_degradation(DegradationConfig {
            error_rate_threshold: 1.5,
            ..DegradationConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_methods_override_fields() {
        let config = EngineConfig::default()
            .with_gate_timeout(Duration::from_millis(5))
            .with_fallback_on_gate_error(false);
        assert_eq!(config.gate_timeout, Duration::from_millis(5));
        assert!(!config.fallback_on_gate_error);
    }

    #[test]
    fn config_serializes() {
        let json = serde_json::to_string(&EngineConfig::default()).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EngineConfig::default());
    }
}
