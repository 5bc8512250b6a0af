//! # Seatgate Testing
//!
//! Test doubles for the two external collaborators of the allocation engine.
//!
//! This crate provides:
//! - [`InMemoryLedger`]: a `LedgerStore` with read/write accounting, injectable
//!   failures and an optional contention window that widens the read-to-write race
//! - [`InMemoryFastGate`]: a `FastGate` whose scripts run under one lock (mirroring
//!   single-threaded script execution), with TTL expiry on `tokio::time` so tests
//!   can pause time, plus injectable errors and latency
//! - [`FixedClock`]: deterministic reservation timestamps
//!
//! ## Example
//!
//! ```
//! use seatgate_testing::{InMemoryFastGate, InMemoryLedger};
//!
//! let ledger = InMemoryLedger::new();
//! let item = ledger.insert_item("Flash sale", 10);
//! assert_eq!(item.remaining, 10);
//!
//! let gate = InMemoryFastGate::new();
//! gate.prime(item.id, 10);
//! assert_eq!(gate.snapshot(item.id).available(), Some(10));
//! ```

use chrono::{DateTime, Utc};
use seatgate_core::environment::Clock;

mod gate;
mod ledger;

pub use gate::{GateCallStats, InMemoryFastGate};
pub use ledger::{InMemoryLedger, LedgerStats};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making reservation timestamps reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatgate_testing::mocks::FixedClock;
    /// use seatgate_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

/// Install a `tracing` subscriber for test output, once per process.
///
/// Honours `RUST_LOG`; silent by default.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{FixedClock, test_clock};
