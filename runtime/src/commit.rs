//! Durable commit shared by both allocation strategies.
//!
//! Wraps the ledger with round-trip accounting and cache invalidation so the
//! optimistic allocator and Phase 2 of the admission gate cannot drift apart
//! in how they read, write or count.

use crate::cache::ItemCache;
use crate::metrics::EngineMetrics;
use seatgate_core::inventory::{InventoryItem, ItemId, Reservation, ReservationDraft, Version};
use seatgate_core::ledger::{LedgerError, LedgerStore};
use std::sync::Arc;

/// Result of one conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitAttempt {
    /// Row updated and reservation persisted.
    Committed(Reservation),
    /// Zero rows affected: the version moved or capacity ran out.
    Conflict,
}

/// Ledger access with accounting.
#[derive(Clone)]
pub struct DurableCommit {
    ledger: Arc<dyn LedgerStore>,
    metrics: Arc<EngineMetrics>,
    cache: Arc<ItemCache>,
}

impl DurableCommit {
    /// Create a commit helper over `ledger`.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        metrics: Arc<EngineMetrics>,
        cache: Arc<ItemCache>,
    ) -> Self {
        Self {
            ledger,
            metrics,
            cache,
        }
    }

    /// Read the authoritative item snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the item is missing or the store fails.
    pub async fn read(&self, id: ItemId) -> Result<InventoryItem, LedgerError> {
        self.metrics.record_ledger_read();
        self.ledger
            .read_item(id)
            .await
            .inspect_err(|e| self.store_failed(e))
    }

    /// Conditionally decrement and persist `draft` against `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the store fails. A lost race is not an
    /// error; it is [`CommitAttempt::Conflict`].
    pub async fn attempt(
        &self,
        draft: ReservationDraft,
        expected: Version,
    ) -> Result<CommitAttempt, LedgerError> {
        let item = draft.item_id;
        self.metrics.record_ledger_write();

        match self.ledger.commit_reservation(draft, expected).await {
            Ok(Some(reservation)) => Ok(self.committed(item, reservation)),
            Ok(None) => {
                self.metrics.record_version_conflict();
                Ok(CommitAttempt::Conflict)
            }
            Err(e) => {
                self.store_failed(&e);
                Err(e)
            }
        }
    }

    /// Decrement and persist `draft` for a request that already holds its
    /// seats in the fast gate. Only capacity can make this miss.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the store fails.
    pub async fn attempt_held(
        &self,
        draft: ReservationDraft,
    ) -> Result<CommitAttempt, LedgerError> {
        let item = draft.item_id;
        self.metrics.record_ledger_write();

        match self.ledger.commit_held_reservation(draft).await {
            Ok(Some(reservation)) => Ok(self.committed(item, reservation)),
            Ok(None) => Ok(CommitAttempt::Conflict),
            Err(e) => {
                self.store_failed(&e);
                Err(e)
            }
        }
    }

    fn committed(&self, item: ItemId, reservation: Reservation) -> CommitAttempt {
        self.cache.invalidate(item);
        self.metrics.record_confirmed();
        CommitAttempt::Committed(reservation)
    }

    fn store_failed(&self, error: &LedgerError) {
        // A missing item is a caller error, not a store outage.
        if !matches!(error, LedgerError::ItemNotFound(_)) {
            self.metrics.record_store_failure();
            tracing::warn!(error = %error, "Ledger store call failed");
        }
    }
}
