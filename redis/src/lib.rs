//! Redis fast gate for seatgate.
//!
//! [`RedisFastGate`] implements the `FastGate` trait from `seatgate-core` on a
//! Redis `ConnectionManager`. Each inventory item owns two keys:
//!
//! - `{prefix}gate:{<id>}:capacity`: mirror of the ledger's remaining seats
//! - `{prefix}gate:{<id>}:provisional`: seats held by in-flight reservations, with a TTL
//!
//! The braces form a hash tag, so both keys of an item land on one cluster
//! slot and every Lua script touches a single shard.
//!
//! # Example
//!
//! ```no_run
//! use seatgate_redis::{RedisConfig, RedisFastGate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = RedisFastGate::connect(&RedisConfig::from_env()).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod gate;
mod scripts;

pub use config::RedisConfig;
pub use gate::RedisFastGate;
