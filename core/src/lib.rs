//! # Seatgate Core
//!
//! Core types and collaborator interfaces for the seatgate allocation engine.
//!
//! The engine allocates a strictly bounded inventory among many concurrent
//! requesters. All mutual exclusion lives in two external stores:
//!
//! - **Ledger Store** ([`ledger::LedgerStore`]): the durable, authoritative record of
//!   remaining capacity, guarded by a per-item version used for compare-and-swap.
//! - **Fast Gate** ([`gate::FastGate`]): an ephemeral counter service that rejects
//!   obviously unsatisfiable requests before they reach the ledger.
//!
//! This crate only defines the vocabulary. Strategies live in `seatgate-runtime`,
//! concrete stores in `seatgate-postgres`, `seatgate-redis` and `seatgate-testing`.
//!
//! ## Example
//!
//! ```
//! use seatgate_core::inventory::{ItemId, Quantity, Version};
//!
//! let item = ItemId::new(7);
//! let quantity = Quantity::new(2).unwrap();
//! assert_eq!(item.value(), 7);
//! assert_eq!(quantity.get(), 2);
//! assert_eq!(Version::INITIAL.next(), Version::new(1));
//! ```

pub use chrono::{DateTime, Utc};

pub mod gate;
pub mod inventory;
pub mod ledger;
pub mod outcome;

/// Environment traits injected into the engine.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts wall-clock time for testability.
    ///
    /// Used to stamp reservations. Interval and TTL timing uses
    /// `tokio::time::Instant` so tests can pause time instead.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
