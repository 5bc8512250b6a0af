//! Fast gate trait: the ephemeral admission counters.
//!
//! Each inventory item owns a pair of counters in the gate:
//!
//! - `capacity`: mirror of the ledger's remaining capacity, overwritten by the reconciler
//! - `provisional`: seats held by in-flight reservations, bounded by a TTL
//!
//! `capacity - provisional` approximates true availability. The gate executes
//! its check-and-increment as one script, so concurrent admissions cannot both
//! see the last seat. The gate carries no independent source of truth; losing
//! it costs only staleness, never overbooking, because the ledger still gates
//! every commit.

use crate::inventory::{ItemId, Quantity};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors from fast gate operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The gate could not be reached.
    #[error("Fast gate unavailable: {0}")]
    Unavailable(String),

    /// The gate did not answer within its timeout.
    #[error("Fast gate call timed out after {0:?}")]
    Timeout(Duration),

    /// The gate answered with something the script contract does not allow.
    #[error("Fast gate script failed: {0}")]
    Script(String),
}

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// `provisional` was incremented; the caller now owns a provisional hold.
    Admitted,
    /// `capacity - provisional < quantity`; nothing was changed.
    Rejected {
        /// Seats the gate believed were available.
        available: u64,
    },
    /// No `capacity` counter exists for the item (never reconciled, or expired).
    Unprimed,
}

/// Snapshot of an item's gate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterPair {
    /// Mirrored ledger capacity, if primed.
    pub capacity: Option<u64>,
    /// Seats held by in-flight reservations.
    pub provisional: u64,
}

impl CounterPair {
    /// `capacity - provisional`, floored at zero. `None` when unprimed.
    #[must_use]
    pub fn available(&self) -> Option<u64> {
        self.capacity.map(|c| c.saturating_sub(self.provisional))
    }
}

/// Boxed future returned by gate operations.
pub type GateFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GateError>> + Send + 'a>>;

/// Fast admission counter service.
pub trait FastGate: Send + Sync {
    /// Atomically: if `capacity - provisional >= quantity`, increment
    /// `provisional` by `quantity` and refresh its TTL to `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the gate is unreachable or slow.
    fn admit_and_reserve(
        &self,
        item: ItemId,
        quantity: Quantity,
        ttl: Duration,
    ) -> GateFuture<'_, Admission>;

    /// Decrement `provisional` by `quantity`, floored at zero.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the gate is unreachable or slow.
    fn release(&self, item: ItemId, quantity: Quantity) -> GateFuture<'_, ()>;

    /// Fold a committed hold: decrement both `provisional` and `capacity` by
    /// `quantity`, each floored at zero, in one atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the gate is unreachable or slow.
    fn fold(&self, item: ItemId, quantity: Quantity) -> GateFuture<'_, ()>;

    /// Overwrite `capacity` with the ledger's authoritative value.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the gate is unreachable or slow.
    fn set_capacity(&self, item: ItemId, value: u32) -> GateFuture<'_, ()>;

    /// Read both counters.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the gate is unreachable or slow.
    fn counters(&self, item: ItemId) -> GateFuture<'_, CounterPair>;

    /// Cheap liveness probe.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the gate is unreachable or slow.
    fn ping(&self) -> GateFuture<'_, ()>;
}
