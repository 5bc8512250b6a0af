//! Optimistic allocator.
//!
//! Read the item, check capacity, then write conditioned on the version that
//! was read. A concurrent writer bumps the version and the write affects zero
//! rows; the loser re-reads and retries, up to the policy's attempt budget.
//!
//! Under a flash sale almost every request collides on the same row, so most
//! of the ledger writes are wasted. That amplification is what the admission
//! gate exists to remove.

use crate::commit::{CommitAttempt, DurableCommit};
use crate::metrics::EngineMetrics;
use crate::retry::RetryPolicy;
use seatgate_core::environment::Clock;
use seatgate_core::inventory::{ItemId, Quantity, RequesterId, ReservationDraft};
use seatgate_core::outcome::{AllocationError, RejectReason, ReserveOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bounded compare-and-swap allocation against the ledger.
pub struct OptimisticAllocator {
    commit: DurableCommit,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
}

impl OptimisticAllocator {
    /// Create an allocator.
    #[must_use]
    pub fn new(
        commit: DurableCommit,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            commit,
            retry,
            clock,
            metrics,
        }
    }

    /// Reserve `quantity` seats of `item` for `requester`.
    ///
    /// Returns `Rejected(SoldOut)` as soon as a read shows insufficient
    /// capacity (no retry), and `Rejected(Contention)` once every attempt lost
    /// its version race.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError`] when the item does not exist or the ledger
    /// fails. A store failure is never reported as sold out.
    pub async fn allocate(
        &self,
        item: ItemId,
        requester: RequesterId,
        quantity: Quantity,
    ) -> Result<ReserveOutcome, AllocationError> {
        let draft = ReservationDraft::new(requester, item, quantity, self.clock.now());

        for attempt in 1..=self.retry.max_attempts {
            self.metrics.record_attempt();

            let snapshot = self.commit.read(item).await?;
            if !snapshot.can_satisfy(quantity) {
                info!(
                    item_id = %item,
                    quantity = quantity.get(),
                    remaining = snapshot.remaining,
                    "Reservation rejected: sold out"
                );
                self.metrics.record_rejection(RejectReason::SoldOut);
                return Ok(ReserveOutcome::Rejected(RejectReason::SoldOut));
            }

            match self.commit.attempt(draft.clone(), snapshot.version).await? {
                CommitAttempt::Committed(reservation) => {
                    info!(
                        item_id = %item,
                        reservation_id = %reservation.id,
                        quantity = quantity.get(),
                        attempt,
                        "Reservation confirmed"
                    );
                    return Ok(ReserveOutcome::Confirmed(reservation));
                }
                CommitAttempt::Conflict => {
                    debug!(
                        item_id = %item,
                        attempt,
                        expected_version = %snapshot.version,
                        reason = "version_conflict",
                        "Allocation attempt lost version race"
                    );
                    if self.retry.should_retry(attempt) {
                        if let Some(delay) = self.retry.jitter_delay() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        warn!(
            item_id = %item,
            attempts = self.retry.max_attempts,
            "Reservation rejected: contention retries exhausted"
        );
        self.metrics.record_rejection(RejectReason::Contention);
        Ok(ReserveOutcome::Rejected(RejectReason::Contention))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::ItemCache;
    use crate::config::CacheConfig;
    use seatgate_core::ledger::LedgerError;
    use seatgate_testing::{InMemoryLedger, test_clock};

    fn allocator(ledger: &InMemoryLedger, metrics: &Arc<EngineMetrics>) -> OptimisticAllocator {
        let commit = DurableCommit::new(
            Arc::new(ledger.clone()),
            Arc::clone(metrics),
            Arc::new(ItemCache::new(CacheConfig::default())),
        );
        OptimisticAllocator::new(
            commit,
            RetryPolicy::default(),
            Arc::new(test_clock()),
            Arc::clone(metrics),
        )
    }

    #[tokio::test]
    async fn confirms_and_decrements() {
        let ledger = InMemoryLedger::new();
        let item = ledger.insert_item("Hall A", 3);
        let metrics = Arc::new(EngineMetrics::new());
        let allocator = allocator(&ledger, &metrics);

        let outcome = allocator
            .allocate(item.id, RequesterId::new(1), Quantity::new(2).unwrap())
            .await
            .unwrap();

        let reservation = outcome.reservation().unwrap();
        assert_eq!(reservation.quantity.get(), 2);
        assert_eq!(reservation.created_at, test_clock().now());
        assert_eq!(ledger.item(item.id).unwrap().remaining, 1);
        assert_eq!(metrics.snapshot().confirmed, 1);
    }

    #[tokio::test]
    async fn sold_out_does_not_write() {
        let ledger = InMemoryLedger::new();
        let item = ledger.insert_item("Hall A", 1);
        let metrics = Arc::new(EngineMetrics::new());
        let allocator = allocator(&ledger, &metrics);

        let outcome = allocator
            .allocate(item.id, RequesterId::new(1), Quantity::new(2).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome, ReserveOutcome::Rejected(RejectReason::SoldOut));
        assert_eq!(ledger.stats().writes, 0);
        assert_eq!(metrics.snapshot().attempts, 1);
    }

    #[tokio::test]
    async fn store_failure_is_an_error_not_sold_out() {
        let ledger = InMemoryLedger::new();
        let item = ledger.insert_item("Hall A", 1);
        ledger.set_failure(Some(LedgerError::Unavailable("connection refused".into())));
        let metrics = Arc::new(EngineMetrics::new());
        let allocator = allocator(&ledger, &metrics);

        let result = allocator
            .allocate(item.id, RequesterId::new(1), Quantity::ONE)
            .await;

        assert_eq!(
            result,
            Err(AllocationError::Store(LedgerError::Unavailable(
                "connection refused".into()
            )))
        );
        assert_eq!(metrics.snapshot().store_failures, 1);
        assert_eq!(metrics.snapshot().rejected(), 0);
    }

    #[tokio::test]
    async fn unknown_item_is_reported() {
        let ledger = InMemoryLedger::new();
        let metrics = Arc::new(EngineMetrics::new());
        let allocator = allocator(&ledger, &metrics);

        let result = allocator
            .allocate(ItemId::new(42), RequesterId::new(1), Quantity::ONE)
            .await;
        assert_eq!(result, Err(AllocationError::ItemNotFound(ItemId::new(42))));
        assert_eq!(metrics.snapshot().store_failures, 0);
    }
}
