//! In-memory ledger store.

use seatgate_core::inventory::{
    InventoryItem, ItemId, Quantity, RequesterId, Reservation, ReservationDraft, Version,
};
use seatgate_core::ledger::{LedgerError, LedgerFuture, LedgerStore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Round-trip counters, the raw material of load amplification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerStats {
    /// `read_item` calls.
    pub reads: u64,
    /// Conditional write attempts (winning or not).
    pub writes: u64,
    /// Conditional writes that affected a row.
    pub successful_writes: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    items: BTreeMap<ItemId, InventoryItem>,
    reservations: Vec<Reservation>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<LedgerState>,
    failure: Mutex<Option<LedgerError>>,
    contention_window: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    successful_writes: AtomicU64,
}

/// In-memory ledger for testing.
///
/// Each conditional write runs under one mutex, giving the same
/// compare-and-swap semantics as the durable store's row update. With the
/// contention window enabled, every write yields to the scheduler before
/// applying, so concurrent tasks read the same version and then race.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an item synchronously (test setup).
    pub fn insert_item(&self, name: &str, total_capacity: u32) -> InventoryItem {
        let mut state = self.lock_state_unchecked();
        state.next_id += 1;
        let item = InventoryItem {
            id: ItemId::new(state.next_id),
            name: name.to_string(),
            total_capacity,
            remaining: total_capacity,
            version: Version::INITIAL,
        };
        state.items.insert(item.id, item.clone());
        item
    }

    /// Make every subsequent call fail with `error` (or clear with `None`).
    pub fn set_failure(&self, error: Option<LedgerError>) {
        if let Ok(mut failure) = self.inner.failure.lock() {
            *failure = error;
        }
    }

    /// Yield to the scheduler between a write's start and its compare-and-swap.
    pub fn set_contention_window(&self, enabled: bool) {
        self.inner.contention_window.store(enabled, Ordering::SeqCst);
    }

    /// Simulate a write that bypasses the engine (admin correction, refund, ...).
    ///
    /// Bumps the version like any other mutation. Values above the item's
    /// total capacity are clamped to it.
    pub fn overwrite_remaining(&self, id: ItemId, remaining: u32) {
        let mut state = self.lock_state_unchecked();
        if let Some(item) = state.items.get_mut(&id) {
            item.remaining = remaining.min(item.total_capacity);
            item.version = item.version.next();
        }
    }

    /// Current snapshot of an item.
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<InventoryItem> {
        self.lock_state_unchecked().items.get(&id).cloned()
    }

    /// All reservations ever committed.
    #[must_use]
    pub fn reservations(&self) -> Vec<Reservation> {
        self.lock_state_unchecked().reservations.clone()
    }

    /// Round-trip counters so far.
    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            reads: self.inner.reads.load(Ordering::SeqCst),
            writes: self.inner.writes.load(Ordering::SeqCst),
            successful_writes: self.inner.successful_writes.load(Ordering::SeqCst),
        }
    }

    fn lock_state_unchecked(&self) -> MutexGuard<'_, LedgerState> {
        // A panicking test thread must not hide the ledger from assertions.
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, LedgerState>, LedgerError> {
        self.inner
            .state
            .lock()
            .map_err(|_| LedgerError::Unavailable("Mutex lock failed".into()))
    }

    fn injected_failure(&self) -> Result<(), LedgerError> {
        let failure = self
            .inner
            .failure
            .lock()
            .map_err(|_| LedgerError::Unavailable("Mutex lock failed".into()))?;
        match failure.as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn widen_race(&self) {
        if self.inner.contention_window.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    /// Apply the compare-and-swap. Caller holds the state lock.
    ///
    /// `expected: None` skips the version predicate; the capacity check stays.
    fn apply_decrement(
        state: &mut LedgerState,
        id: ItemId,
        quantity: Quantity,
        expected: Option<Version>,
    ) -> Result<bool, LedgerError> {
        let item = state
            .items
            .get_mut(&id)
            .ok_or(LedgerError::ItemNotFound(id))?;

        let stale = expected.is_some_and(|v| v != item.version);
        if stale || item.remaining < quantity.get() {
            return Ok(false);
        }

        item.remaining = item.remaining.checked_sub(quantity.get()).ok_or_else(|| {
            LedgerError::ConstraintViolation("inventory_remaining_non_negative".into())
        })?;
        item.version = item.version.next();
        Ok(true)
    }

    async fn commit(
        &self,
        draft: ReservationDraft,
        expected: Option<Version>,
    ) -> Result<Option<Reservation>, LedgerError> {
        self.widen_race().await;
        self.injected_failure()?;
        let committed = {
            let mut state = self.lock_state()?;
            if Self::apply_decrement(&mut state, draft.item_id, draft.quantity, expected)? {
                let reservation = draft.confirm();
                state.reservations.push(reservation.clone());
                Some(reservation)
            } else {
                None
            }
        };
        self.record_write(committed.is_some());
        Ok(committed)
    }

    fn record_write(&self, applied: bool) {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        if applied {
            self.inner.successful_writes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl LedgerStore for InMemoryLedger {
    fn read_item(&self, id: ItemId) -> LedgerFuture<'_, InventoryItem> {
        Box::pin(async move {
            self.inner.reads.fetch_add(1, Ordering::SeqCst);
            self.injected_failure()?;
            let state = self.lock_state()?;
            state
                .items
                .get(&id)
                .cloned()
                .ok_or(LedgerError::ItemNotFound(id))
        })
    }

    fn conditional_decrement(
        &self,
        id: ItemId,
        quantity: Quantity,
        expected: Version,
    ) -> LedgerFuture<'_, bool> {
        Box::pin(async move {
            self.widen_race().await;
            self.injected_failure()?;
            let applied = {
                let mut state = self.lock_state()?;
                Self::apply_decrement(&mut state, id, quantity, Some(expected))?
            };
            self.record_write(applied);
            Ok(applied)
        })
    }

    fn commit_reservation(
        &self,
        draft: ReservationDraft,
        expected: Version,
    ) -> LedgerFuture<'_, Option<Reservation>> {
        Box::pin(self.commit(draft, Some(expected)))
    }

    fn commit_held_reservation(
        &self,
        draft: ReservationDraft,
    ) -> LedgerFuture<'_, Option<Reservation>> {
        Box::pin(self.commit(draft, None))
    }

    fn create_item(&self, name: String, total_capacity: u32) -> LedgerFuture<'_, InventoryItem> {
        Box::pin(async move {
            self.injected_failure()?;
            Ok(self.insert_item(&name, total_capacity))
        })
    }

    fn list_items(&self) -> LedgerFuture<'_, Vec<InventoryItem>> {
        Box::pin(async move {
            self.injected_failure()?;
            let state = self.lock_state()?;
            Ok(state.items.values().cloned().collect())
        })
    }

    fn reservations_for_item(&self, id: ItemId) -> LedgerFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            self.injected_failure()?;
            let state = self.lock_state()?;
            Ok(state
                .reservations
                .iter()
                .filter(|r| r.item_id == id)
                .cloned()
                .collect())
        })
    }

    fn reservations_for_requester(
        &self,
        requester: RequesterId,
    ) -> LedgerFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            self.injected_failure()?;
            let state = self.lock_state()?;
            Ok(state
                .reservations
                .iter()
                .rev()
                .filter(|r| r.requester_id == requester)
                .cloned()
                .collect())
        })
    }
}
