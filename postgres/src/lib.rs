//! `PostgreSQL` ledger store for seatgate.
//!
//! This crate provides [`PostgresLedger`], the production implementation of
//! the `LedgerStore` trait from `seatgate-core`:
//!
//! - Version-checked conditional decrement in a single `UPDATE`
//! - Decrement plus reservation insert in one transaction
//! - `CHECK (remaining >= 0)` as the store-level backstop
//! - Connection pooling with a per-statement timeout
//!
//! # Example
//!
//! ```no_run
//! use seatgate_postgres::{PostgresConfig, PostgresLedger};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = PostgresLedger::connect(&PostgresConfig::from_env()).await?;
//! ledger.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod ledger;

pub use config::PostgresConfig;
pub use ledger::PostgresLedger;
