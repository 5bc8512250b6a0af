//! In-memory fast gate.

use seatgate_core::gate::{Admission, CounterPair, FastGate, GateError, GateFuture};
use seatgate_core::inventory::{ItemId, Quantity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateCallStats {
    /// `admit_and_reserve` calls that reached the script.
    pub admits: u64,
    /// Admissions that returned `Admitted`.
    pub admitted: u64,
    /// `release` calls that reached the script.
    pub releases: u64,
    /// `fold` calls that reached the script.
    pub folds: u64,
    /// `set_capacity` calls that reached the script.
    pub capacity_writes: u64,
    /// Calls that failed (injected errors).
    pub errors: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Entry {
    capacity: Option<u64>,
    provisional: u64,
    provisional_expires_at: Option<Instant>,
}

impl Entry {
    /// Drop the provisional counter if its TTL has passed, like a key expiry.
    fn expire(&mut self, now: Instant) {
        if self.provisional_expires_at.is_some_and(|at| at <= now) {
            self.provisional = 0;
            self.provisional_expires_at = None;
        }
    }

    fn pair(&self) -> CounterPair {
        CounterPair {
            capacity: self.capacity,
            provisional: self.provisional,
        }
    }

    fn release(&mut self, quantity: u64) {
        self.provisional = self.provisional.saturating_sub(quantity);
        if self.provisional == 0 {
            self.provisional_expires_at = None;
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<ItemId, Entry>>,
    failure: Mutex<Option<GateError>>,
    latency: Mutex<Duration>,
    admits: AtomicU64,
    admitted: AtomicU64,
    releases: AtomicU64,
    folds: AtomicU64,
    capacity_writes: AtomicU64,
    errors: AtomicU64,
}

/// In-memory fast gate for testing.
///
/// Every script runs while holding one lock, matching the single-threaded
/// script execution of the real counter service. Expiry uses
/// `tokio::time::Instant`, so `tokio::time::pause()` + `advance()` drive TTLs.
///
/// Cloning shares the underlying counters.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFastGate {
    inner: Arc<Inner>,
}

impl InMemoryFastGate {
    /// Create an empty (unprimed) gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an item's capacity counter synchronously (test setup).
    pub fn prime(&self, item: ItemId, capacity: u32) {
        self.lock_entries_unchecked()
            .entry(item)
            .or_default()
            .capacity = Some(u64::from(capacity));
    }

    /// Make every subsequent call fail with `error` (or clear with `None`).
    pub fn set_failure(&self, error: Option<GateError>) {
        if let Ok(mut failure) = self.inner.failure.lock() {
            *failure = error;
        }
    }

    /// Delay every call by `latency` before it executes.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut current) = self.inner.latency.lock() {
            *current = latency;
        }
    }

    /// Current counters of an item, with TTL expiry applied.
    #[must_use]
    pub fn snapshot(&self, item: ItemId) -> CounterPair {
        let now = Instant::now();
        let mut entries = self.lock_entries_unchecked();
        let entry = entries.entry(item).or_default();
        entry.expire(now);
        entry.pair()
    }

    /// Call counters so far.
    #[must_use]
    pub fn stats(&self) -> GateCallStats {
        GateCallStats {
            admits: self.inner.admits.load(Ordering::SeqCst),
            admitted: self.inner.admitted.load(Ordering::SeqCst),
            releases: self.inner.releases.load(Ordering::SeqCst),
            folds: self.inner.folds.load(Ordering::SeqCst),
            capacity_writes: self.inner.capacity_writes.load(Ordering::SeqCst),
            errors: self.inner.errors.load(Ordering::SeqCst),
        }
    }

    fn lock_entries_unchecked(&self) -> MutexGuard<'_, HashMap<ItemId, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_entries(&self) -> Result<MutexGuard<'_, HashMap<ItemId, Entry>>, GateError> {
        self.inner
            .entries
            .lock()
            .map_err(|_| GateError::Unavailable("Mutex lock failed".into()))
    }

    /// Simulated network delay plus injected failure, applied before each script.
    async fn preamble(&self) -> Result<(), GateError> {
        let latency = self
            .inner
            .latency
            .lock()
            .map(|l| *l)
            .unwrap_or(Duration::ZERO);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failure = self
            .inner
            .failure
            .lock()
            .map_err(|_| GateError::Unavailable("Mutex lock failed".into()))?
            .clone();
        if let Some(err) = failure {
            self.inner.errors.fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }
        Ok(())
    }

    /// Run `script` atomically against one item's entry.
    fn with_entry<T>(
        &self,
        item: ItemId,
        script: impl FnOnce(&mut Entry, Instant) -> T,
    ) -> Result<T, GateError> {
        let now = Instant::now();
        let mut entries = self.lock_entries()?;
        let entry = entries.entry(item).or_default();
        entry.expire(now);
        Ok(script(entry, now))
    }
}

impl FastGate for InMemoryFastGate {
    fn admit_and_reserve(
        &self,
        item: ItemId,
        quantity: Quantity,
        ttl: Duration,
    ) -> GateFuture<'_, Admission> {
        Box::pin(async move {
            self.preamble().await?;
            self.inner.admits.fetch_add(1, Ordering::SeqCst);
            let wanted = u64::from(quantity.get());
            let admission = self.with_entry(item, |entry, now| {
                let Some(capacity) = entry.capacity else {
                    return Admission::Unprimed;
                };
                let available = capacity.saturating_sub(entry.provisional);
                if available < wanted {
                    return Admission::Rejected { available };
                }
                entry.provisional += wanted;
                entry.provisional_expires_at = Some(now + ttl);
                Admission::Admitted
            })?;
            if admission == Admission::Admitted {
                self.inner.admitted.fetch_add(1, Ordering::SeqCst);
            }
            Ok(admission)
        })
    }

    fn release(&self, item: ItemId, quantity: Quantity) -> GateFuture<'_, ()> {
        Box::pin(async move {
            self.preamble().await?;
            self.inner.releases.fetch_add(1, Ordering::SeqCst);
            self.with_entry(item, |entry, _| entry.release(u64::from(quantity.get())))
        })
    }

    fn fold(&self, item: ItemId, quantity: Quantity) -> GateFuture<'_, ()> {
        Box::pin(async move {
            self.preamble().await?;
            self.inner.folds.fetch_add(1, Ordering::SeqCst);
            self.with_entry(item, |entry, _| {
                let quantity = u64::from(quantity.get());
                entry.release(quantity);
                entry.capacity = entry.capacity.map(|c| c.saturating_sub(quantity));
            })
        })
    }

    fn set_capacity(&self, item: ItemId, value: u32) -> GateFuture<'_, ()> {
        Box::pin(async move {
            self.preamble().await?;
            self.inner.capacity_writes.fetch_add(1, Ordering::SeqCst);
            self.with_entry(item, |entry, _| entry.capacity = Some(u64::from(value)))
        })
    }

    fn counters(&self, item: ItemId) -> GateFuture<'_, CounterPair> {
        Box::pin(async move {
            self.preamble().await?;
            self.with_entry(item, |entry, _| entry.pair())
        })
    }

    fn ping(&self) -> GateFuture<'_, ()> {
        Box::pin(async move { self.preamble().await })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn admits_until_capacity_minus_provisional_is_exhausted() {
        let gate = InMemoryFastGate::new();
        let item = ItemId::new(1);
        gate.prime(item, 2);

        for _ in 0..2 {
            assert_eq!(
                gate.admit_and_reserve(item, Quantity::ONE, TTL).await.unwrap(),
                Admission::Admitted
            );
        }
        assert_eq!(
            gate.admit_and_reserve(item, Quantity::ONE, TTL).await.unwrap(),
            Admission::Rejected { available: 0 }
        );
        assert_eq!(gate.snapshot(item).provisional, 2);
    }

    #[tokio::test]
    async fn unprimed_item_is_reported() {
        let gate = InMemoryFastGate::new();
        assert_eq!(
            gate.admit_and_reserve(ItemId::new(4), Quantity::ONE, TTL)
                .await
                .unwrap(),
            Admission::Unprimed
        );
    }

    #[tokio::test]
    async fn release_is_floored_at_zero() {
        let gate = InMemoryFastGate::new();
        let item = ItemId::new(1);
        gate.prime(item, 5);

        gate.admit_and_reserve(item, Quantity::ONE, TTL).await.unwrap();
        gate.release(item, Quantity::new(3).unwrap()).await.unwrap();
        assert_eq!(gate.snapshot(item).provisional, 0);
    }

    #[tokio::test]
    async fn fold_moves_hold_into_capacity() {
        let gate = InMemoryFastGate::new();
        let item = ItemId::new(1);
        gate.prime(item, 5);

        let two = Quantity::new(2).unwrap();
        gate.admit_and_reserve(item, two, TTL).await.unwrap();
        gate.fold(item, two).await.unwrap();

        let pair = gate.snapshot(item);
        assert_eq!(pair.capacity, Some(3));
        assert_eq!(pair.provisional, 0);
        assert_eq!(pair.available(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn provisional_hold_expires_after_ttl() {
        let gate = InMemoryFastGate::new();
        let item = ItemId::new(1);
        gate.prime(item, 1);

        gate.admit_and_reserve(item, Quantity::ONE, TTL).await.unwrap();
        assert_eq!(gate.snapshot(item).available(), Some(0));

        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert_eq!(gate.snapshot(item).provisional, 0);
        assert_eq!(gate.snapshot(item).available(), Some(1));
    }

    #[tokio::test]
    async fn injected_failure_is_counted() {
        let gate = InMemoryFastGate::new();
        gate.set_failure(Some(GateError::Unavailable("connection reset".into())));

        assert!(gate.ping().await.is_err());
        assert_eq!(gate.stats().errors, 1);

        gate.set_failure(None);
        assert!(gate.ping().await.is_ok());
    }
}
