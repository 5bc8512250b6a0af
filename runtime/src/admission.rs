//! Two-phase admission gate.
//!
//! **Phase 1** asks the fast gate to atomically check `capacity - provisional`
//! and, if enough seats appear free, increment `provisional`. A rejection
//! here ends the request without touching the ledger, which is where the
//! load reduction comes from.
//!
//! **Phase 2** runs only for admitted requests: one read and one conditional
//! write against the ledger, guarded by `remaining >= quantity`. The ledger
//! remains authoritative; the gate only filters. The provisional hold is then
//! settled exactly once, folded into `capacity` on success or released on any
//! failure.
//!
//! The hold is owned and Phase 2 spawned in the same poll that sees the
//! gate's answer, so a caller that gives up at any later await cannot abandon
//! it; [`ProvisionalHold`] releases on drop as a last resort, and the gate's
//! TTL bounds anything that still slips through.

use crate::allocator::OptimisticAllocator;
use crate::commit::{CommitAttempt, DurableCommit};
use crate::degradation::DegradationController;
use crate::metrics::EngineMetrics;
use seatgate_core::environment::Clock;
use seatgate_core::gate::{Admission, FastGate, GateError};
use seatgate_core::inventory::{ItemId, Quantity, RequesterId, ReservationDraft};
use seatgate_core::ledger::LedgerError;
use seatgate_core::outcome::{AllocationError, RejectReason, ReserveOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Admission gate timing and fallback settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSettings {
    /// Lifetime of a provisional hold
    pub provisional_ttl: Duration,
    /// Bound on every fast gate call
    pub gate_timeout: Duration,
    /// Serve through the optimistic allocator when the gate errors
    pub fallback_on_gate_error: bool,
}

/// A provisional hold owned by one admitted request.
///
/// Must be settled with [`fold`](Self::fold) or [`release`](Self::release).
/// If dropped unsettled, a release is spawned on the current runtime.
pub struct ProvisionalHold {
    gate: Arc<dyn FastGate>,
    item: ItemId,
    quantity: Quantity,
    call_timeout: Duration,
    metrics: Arc<EngineMetrics>,
    settled: bool,
}

impl ProvisionalHold {
    fn new(
        gate: Arc<dyn FastGate>,
        item: ItemId,
        quantity: Quantity,
        call_timeout: Duration,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            gate,
            item,
            quantity,
            call_timeout,
            metrics,
            settled: false,
        }
    }

    /// Commit succeeded: move the hold out of `provisional` and out of `capacity`.
    pub async fn fold(mut self) {
        self.settled = true;
        let result =
            tokio::time::timeout(self.call_timeout, self.gate.fold(self.item, self.quantity))
                .await;
        match flatten(result, self.call_timeout) {
            Ok(()) => self.metrics.record_provisional_fold(),
            Err(e) => {
                // Capacity stays high until the next reconcile; the hold expires by TTL.
                warn!(
                    item_id = %self.item,
                    quantity = self.quantity.get(),
                    error = %e,
                    "Failed to fold provisional hold"
                );
                self.metrics.record_hold_settle_failure();
            }
        }
    }

    /// Commit did not happen: give the seats back to `provisional`.
    pub async fn release(mut self) {
        self.settled = true;
        let result = tokio::time::timeout(
            self.call_timeout,
            self.gate.release(self.item, self.quantity),
        )
        .await;
        match flatten(result, self.call_timeout) {
            Ok(()) => self.metrics.record_provisional_release(),
            Err(e) => {
                warn!(
                    item_id = %self.item,
                    quantity = self.quantity.get(),
                    error = %e,
                    "Failed to release provisional hold, leaving it to TTL expiry"
                );
                self.metrics.record_hold_settle_failure();
            }
        }
    }
}

impl Drop for ProvisionalHold {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let (item, quantity) = (self.item, self.quantity);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let gate = Arc::clone(&self.gate);
                let metrics = Arc::clone(&self.metrics);
                let call_timeout = self.call_timeout;
                handle.spawn(async move {
                    let result =
                        tokio::time::timeout(call_timeout, gate.release(item, quantity)).await;
                    match flatten(result, call_timeout) {
                        Ok(()) => metrics.record_provisional_release(),
                        Err(e) => {
                            warn!(item_id = %item, error = %e, "Failed to release abandoned hold");
                            metrics.record_hold_settle_failure();
                        }
                    }
                });
            }
            Err(_) => {
                warn!(
                    item_id = %item,
                    quantity = quantity.get(),
                    "No runtime to release abandoned hold, leaving it to TTL expiry"
                );
                self.metrics.record_hold_settle_failure();
            }
        }
    }
}

fn flatten<T>(
    result: Result<Result<T, GateError>, tokio::time::error::Elapsed>,
    call_timeout: Duration,
) -> Result<T, GateError> {
    result.unwrap_or(Err(GateError::Timeout(call_timeout)))
}

/// Phase 1 + Phase 2 reservation front.
pub struct AdmissionGate {
    gate: Arc<dyn FastGate>,
    commit: DurableCommit,
    fallback: Arc<OptimisticAllocator>,
    health: Arc<DegradationController>,
    settings: AdmissionSettings,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
}

impl AdmissionGate {
    /// Create an admission gate.
    ///
    /// `fallback` serves requests the gate cannot decide (unprimed item, or
    /// gate error with fallback enabled). `health` receives one sample per
    /// admission call.
    #[must_use]
    pub fn new(
        gate: Arc<dyn FastGate>,
        commit: DurableCommit,
        fallback: Arc<OptimisticAllocator>,
        health: Arc<DegradationController>,
        settings: AdmissionSettings,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            gate,
            commit,
            fallback,
            health,
            settings,
            clock,
            metrics,
        }
    }

    /// Reserve `quantity` seats of `item` for `requester`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError`] when the item does not exist or the ledger
    /// fails. Gate failures never surface as errors: they fall back or
    /// reject with `GateUnavailable`.
    pub async fn reserve(
        &self,
        item: ItemId,
        requester: RequesterId,
        quantity: Quantity,
    ) -> Result<ReserveOutcome, AllocationError> {
        let (result, elapsed) = self.admit(item, quantity).await;
        let healthy = result.is_ok();

        // An admitted hold gets its owner and its Phase 2 task before the
        // next await point, so a caller dropped from here on cannot orphan it.
        let decision = result.map(|admission| match admission {
            Admission::Admitted => Decision::Held(self.spawn_commit(item, requester, quantity)),
            Admission::Rejected { available } => Decision::Rejected { available },
            Admission::Unprimed => Decision::Unprimed,
        });
        self.health.record(healthy, elapsed).await;

        match decision {
            Ok(Decision::Held(task)) => join_commit(item, task).await,
            Ok(Decision::Rejected { available }) => {
                debug!(
                    item_id = %item,
                    quantity = quantity.get(),
                    available,
                    "Reservation rejected by fast gate"
                );
                self.metrics.record_fast_rejection();
                self.metrics.record_rejection(RejectReason::SoldOut);
                Ok(ReserveOutcome::Rejected(RejectReason::SoldOut))
            }
            Ok(Decision::Unprimed) => {
                debug!(item_id = %item, "Fast gate not primed for item, using optimistic allocator");
                self.metrics.record_gate_fallback();
                self.fallback.allocate(item, requester, quantity).await
            }
            Err(e) => {
                warn!(item_id = %item, error = %e, "Fast gate admission failed");
                self.metrics.record_gate_error();
                if self.settings.fallback_on_gate_error {
                    self.metrics.record_gate_fallback();
                    self.fallback.allocate(item, requester, quantity).await
                } else {
                    self.metrics.record_rejection(RejectReason::GateUnavailable);
                    Ok(ReserveOutcome::Rejected(RejectReason::GateUnavailable))
                }
            }
        }
    }

    /// Phase 1. A timed-out call may still have incremented `provisional`;
    /// that hold has no owner and is reclaimed by TTL.
    async fn admit(
        &self,
        item: ItemId,
        quantity: Quantity,
    ) -> (Result<Admission, GateError>, Duration) {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.settings.gate_timeout,
            self.gate
                .admit_and_reserve(item, quantity, self.settings.provisional_ttl),
        )
        .await;
        let result = flatten(result, self.settings.gate_timeout);

        let elapsed = started.elapsed();
        self.metrics.record_gate_call(elapsed);
        (result, elapsed)
    }

    /// Take ownership of an admitted hold and start Phase 2 on its own task.
    fn spawn_commit(
        &self,
        item: ItemId,
        requester: RequesterId,
        quantity: Quantity,
    ) -> JoinHandle<Result<ReserveOutcome, AllocationError>> {
        let hold = ProvisionalHold::new(
            Arc::clone(&self.gate),
            item,
            quantity,
            self.settings.gate_timeout,
            Arc::clone(&self.metrics),
        );
        let draft = ReservationDraft::new(requester, item, quantity, self.clock.now());
        let commit = self.commit.clone();
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move { commit_admitted(commit, hold, draft, &metrics).await })
    }
}

/// Phase 1 verdict, with Phase 2 already running for admitted requests.
enum Decision {
    Held(JoinHandle<Result<ReserveOutcome, AllocationError>>),
    Rejected { available: u64 },
    Unprimed,
}

async fn join_commit(
    item: ItemId,
    task: JoinHandle<Result<ReserveOutcome, AllocationError>>,
) -> Result<ReserveOutcome, AllocationError> {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(item_id = %item, error = %e, "Admitted commit task failed");
            Err(AllocationError::Store(LedgerError::Unavailable(format!(
                "commit task failed: {e}"
            ))))
        }
    }
}

/// Phase 2. The hold already reserves these seats against every other
/// admitted request, so the write is conditioned on capacity alone: a version
/// race between holders is not a reason to give seats back.
async fn commit_admitted(
    commit: DurableCommit,
    hold: ProvisionalHold,
    draft: ReservationDraft,
    metrics: &EngineMetrics,
) -> Result<ReserveOutcome, AllocationError> {
    let (item, quantity) = (draft.item_id, draft.quantity);

    let snapshot = match commit.read(item).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            hold.release().await;
            return Err(e.into());
        }
    };

    // The gate's capacity can run ahead of the ledger until the next reconcile.
    if !snapshot.can_satisfy(quantity) {
        hold.release().await;
        info!(
            item_id = %item,
            quantity = quantity.get(),
            remaining = snapshot.remaining,
            "Admitted reservation rejected: sold out in ledger"
        );
        metrics.record_rejection(RejectReason::SoldOut);
        return Ok(ReserveOutcome::Rejected(RejectReason::SoldOut));
    }

    match commit.attempt_held(draft).await {
        Ok(CommitAttempt::Committed(reservation)) => {
            hold.fold().await;
            info!(
                item_id = %item,
                reservation_id = %reservation.id,
                quantity = quantity.get(),
                "Reservation confirmed"
            );
            Ok(ReserveOutcome::Confirmed(reservation))
        }
        Ok(CommitAttempt::Conflict) => {
            // Capacity left the ledger between the read and the write.
            hold.release().await;
            debug!(
                item_id = %item,
                quantity = quantity.get(),
                reason = "sold_out_at_commit",
                "Admitted reservation missed ledger capacity"
            );
            metrics.record_rejection(RejectReason::SoldOut);
            Ok(ReserveOutcome::Rejected(RejectReason::SoldOut))
        }
        Err(e) => {
            hold.release().await;
            Err(e.into())
        }
    }
}
