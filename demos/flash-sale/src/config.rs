//! Configuration for the flash-sale run.
//!
//! Loads from environment variables (after `.env`, if present) with defaults.

use seatgate_postgres::PostgresConfig;
use seatgate_redis::RedisConfig;
use seatgate_runtime::config::EngineConfig;
use seatgate_runtime::service::Strategy;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Which ledger and gate the run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// In-process ledger and gate
    #[default]
    Memory,
    /// `PostgreSQL` ledger and Redis gate
    External,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "external" => Ok(Self::External),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::External => "external",
        })
    }
}

/// Flash-sale run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ledger and gate backend
    pub backend: Backend,
    /// Request routing
    pub strategy: Strategy,
    /// Concurrent requesters
    pub requesters: u32,
    /// Seats on sale
    pub capacity: u32,
    /// Seats per request
    pub quantity: u32,
    /// Yield between read and write in the in-memory ledger
    pub contention_window: bool,
    /// Dump the Prometheus exposition after the report
    pub print_metrics: bool,
    /// Metrics scrape address
    pub metrics_addr: SocketAddr,
    /// Engine tuning
    pub engine: EngineConfig,
    /// Ledger connection (external backend)
    pub postgres: PostgresConfig,
    /// Gate connection (external backend)
    pub redis: RedisConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            backend: env::var("FLASH_SALE_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            strategy: env::var("FLASH_SALE_STRATEGY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Strategy::Gate),
            requesters: env::var("FLASH_SALE_REQUESTERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            capacity: env::var("FLASH_SALE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            quantity: env::var("FLASH_SALE_QUANTITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            contention_window: env::var("FLASH_SALE_CONTENTION_WINDOW")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            print_metrics: env::var("FLASH_SALE_PRINT_METRICS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            metrics_addr: env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 9090))),
            engine: EngineConfig::from_env(),
            postgres: PostgresConfig::from_env(),
            redis: RedisConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("MEMORY".parse::<Backend>(), Ok(Backend::Memory));
        assert_eq!("external".parse::<Backend>(), Ok(Backend::External));
        assert!("sqlite".parse::<Backend>().is_err());
        assert_eq!(Backend::default().to_string(), "memory");
    }
}
