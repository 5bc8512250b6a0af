//! Ledger store trait: the durable, authoritative inventory record.
//!
//! # Design
//!
//! The ledger offers exactly one way to take capacity: a conditional decrement
//! that succeeds only when the caller's version is still current *and* enough
//! capacity remains. Everything else is a read.
//!
//! ```text
//! UPDATE inventory_items
//!    SET remaining = remaining - :quantity, version = version + 1
//!  WHERE id = :id AND version = :expected AND remaining >= :quantity
//! ```
//!
//! Zero rows affected means another writer won the race (or capacity ran out
//! between the read and the write). The store also enforces `remaining >= 0`
//! independently as a constraint.
//!
//! Requests admitted by the fast gate already hold their seats, so they commit
//! through [`LedgerStore::commit_held_reservation`], which drops the version
//! predicate but keeps `remaining >= :quantity` in the same statement. Two
//! admitted holders reading the same version therefore both land instead of
//! one stranding capacity by losing the race.
//!
//! # Implementations
//!
//! - `PostgresLedger` (in `seatgate-postgres`): production implementation
//! - `InMemoryLedger` (in `seatgate-testing`): deterministic tests with fault injection
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so the engine can hold `Arc<dyn LedgerStore>`.

use crate::inventory::{
    InventoryItem, ItemId, Quantity, RequesterId, Reservation, ReservationDraft, Version,
};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The store could not be reached or the query failed.
    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within its timeout.
    #[error("Ledger operation timed out after {0:?}")]
    Timeout(Duration),

    /// No inventory item with this id.
    #[error("Inventory item not found: {0}")]
    ItemNotFound(ItemId),

    /// A store-level constraint rejected the write (e.g. `remaining >= 0`).
    #[error("Ledger constraint violated: {0}")]
    ConstraintViolation(String),

    /// The request could not be represented in the store.
    #[error("Invalid ledger input: {0}")]
    InvalidInput(String),
}

impl LedgerError {
    /// Whether the failure is transient (worth retrying the request later).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Boxed future returned by ledger operations.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Durable inventory ledger.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine shares one instance across
/// all request tasks and the reconciler.
pub trait LedgerStore: Send + Sync {
    /// Read an item's remaining capacity and version.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ItemNotFound`] for unknown items and
    /// [`LedgerError::Unavailable`]/[`LedgerError::Timeout`] on store failure.
    fn read_item(&self, id: ItemId) -> LedgerFuture<'_, InventoryItem>;

    /// Atomically decrement `remaining` by `quantity` and bump the version,
    /// only if the stored version equals `expected` and `remaining >= quantity`.
    ///
    /// Returns `Ok(false)` when zero rows were affected.
    ///
    /// # Errors
    ///
    /// Returns an error only for store failures, never for a lost race.
    fn conditional_decrement(
        &self,
        id: ItemId,
        quantity: Quantity,
        expected: Version,
    ) -> LedgerFuture<'_, bool>;

    /// Conditional decrement plus the reservation insert, as one atomic unit.
    ///
    /// Returns `Ok(None)` when the decrement affected zero rows; nothing is
    /// written in that case.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures. On error nothing is committed.
    fn commit_reservation(
        &self,
        draft: ReservationDraft,
        expected: Version,
    ) -> LedgerFuture<'_, Option<Reservation>>;

    /// Decrement guarded only by `remaining >= quantity`, plus the reservation
    /// insert, as one atomic unit. The version still moves by exactly one.
    ///
    /// Returns `Ok(None)` when capacity ran out; nothing is written in that case.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures. On error nothing is committed.
    fn commit_held_reservation(
        &self,
        draft: ReservationDraft,
    ) -> LedgerFuture<'_, Option<Reservation>>;

    /// Create an item with `remaining = total_capacity` at version 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the item or is unavailable.
    fn create_item(&self, name: String, total_capacity: u32) -> LedgerFuture<'_, InventoryItem>;

    /// List every inventory item (reconciler input).
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn list_items(&self) -> LedgerFuture<'_, Vec<InventoryItem>>;

    /// All reservations recorded against an item, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn reservations_for_item(&self, id: ItemId) -> LedgerFuture<'_, Vec<Reservation>>;

    /// All reservations made by one requester, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn reservations_for_requester(
        &self,
        requester: RequesterId,
    ) -> LedgerFuture<'_, Vec<Reservation>>;
}
