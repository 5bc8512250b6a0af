//! Flash-sale scenarios against the in-memory ledger and gate.
//!
//! 100 requesters compete for 10 seats. Through the admission gate the
//! ledger sees at most one write per seat; through the optimistic allocator
//! every lost version race is another wasted write.

#![allow(clippy::unwrap_used)]

use futures::FutureExt;
use seatgate_core::gate::{FastGate, GateError};
use seatgate_core::inventory::{ItemId, Quantity, RequesterId};
use seatgate_core::outcome::{RejectReason, ReserveOutcome};
use seatgate_runtime::config::{DegradationConfig, EngineConfig};
use seatgate_runtime::service::{ReservationService, Strategy};
use seatgate_runtime::shutdown::ShutdownCoordinator;
use seatgate_runtime::GateMode;
use seatgate_testing::{InMemoryFastGate, InMemoryLedger, init_test_tracing, test_clock};
use std::sync::Arc;
use std::time::Duration;

const REQUESTERS: i64 = 100;
const CAPACITY: u32 = 10;

#[derive(Debug, Default)]
struct Tally {
    confirmed: u32,
    sold_out: u32,
    contention: u32,
    gate_unavailable: u32,
}

impl Tally {
    fn add(&mut self, outcome: &ReserveOutcome) {
        match outcome {
            ReserveOutcome::Confirmed(_) => self.confirmed += 1,
            ReserveOutcome::Rejected(RejectReason::SoldOut) => self.sold_out += 1,
            ReserveOutcome::Rejected(RejectReason::Contention) => self.contention += 1,
            ReserveOutcome::Rejected(RejectReason::GateUnavailable) => self.gate_unavailable += 1,
        }
    }
}

fn service(
    ledger: &InMemoryLedger,
    gate: &InMemoryFastGate,
    config: EngineConfig,
) -> Arc<ReservationService> {
    Arc::new(ReservationService::with_clock(
        Arc::new(ledger.clone()),
        Arc::new(gate.clone()),
        config,
        Arc::new(test_clock()),
    ))
}

/// Spawn `REQUESTERS` single-seat requests; requester `i` waits
/// `i / burst` milliseconds first.
async fn run_sale(
    service: &Arc<ReservationService>,
    strategy: Strategy,
    item: ItemId,
    burst: i64,
) -> Tally {
    let handles: Vec<_> = (0..REQUESTERS)
        .map(|i| {
            let service = Arc::clone(service);
            tokio::spawn(async move {
                let wait = u64::try_from(i / burst).unwrap();
                if wait > 0 {
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                }
                service
                    .reserve_with(strategy, item, RequesterId::new(i), Quantity::ONE)
                    .await
            })
        })
        .collect();

    let mut tally = Tally::default();
    for handle in handles {
        tally.add(&handle.await.unwrap().unwrap());
    }
    tally
}

#[tokio::test]
async fn gate_admits_exactly_capacity_with_bounded_ledger_writes() {
    init_test_tracing();
    let ledger = InMemoryLedger::new();
    // Every admitted request reads the same version before any of them writes.
    ledger.set_contention_window(true);
    let gate = InMemoryFastGate::new();
    let service = service(&ledger, &gate, EngineConfig::default());
    let item = service.create_item("Flash sale", CAPACITY).await.unwrap();

    let tally = run_sale(&service, Strategy::Gate, item.id, REQUESTERS).await;

    assert_eq!(tally.confirmed, CAPACITY);
    assert_eq!(tally.sold_out, 90);
    assert_eq!(tally.contention, 0);
    assert_eq!(tally.gate_unavailable, 0);
    assert!(ledger.stats().writes <= u64::from(CAPACITY));
    assert_eq!(ledger.item(item.id).unwrap().remaining, 0);
    assert_eq!(gate.snapshot(item.id).provisional, 0);

    let metrics = service.metrics();
    assert_eq!(metrics.fast_rejections, 90);
    assert_eq!(metrics.version_conflicts, 0);
    assert!(metrics.load_amplification() <= 0.1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate_sells_exactly_capacity_across_worker_threads() {
    let ledger = InMemoryLedger::new();
    ledger.set_contention_window(true);
    let gate = InMemoryFastGate::new();
    let config = EngineConfig::default().with_gate_timeout(Duration::from_secs(1));
    let service = service(&ledger, &gate, config);
    let item = service.create_item("Flash sale", CAPACITY).await.unwrap();

    let tally = run_sale(&service, Strategy::Gate, item.id, REQUESTERS).await;

    assert_eq!(tally.confirmed, CAPACITY);
    assert_eq!(tally.sold_out, 90);
    assert_eq!(tally.contention, 0);
    assert!(ledger.stats().writes <= u64::from(CAPACITY));
    assert_eq!(ledger.item(item.id).unwrap().remaining, 0);
    assert_eq!(gate.snapshot(item.id).provisional, 0);
}

#[tokio::test(start_paused = true)]
async fn unit_requests_sell_exactly_capacity_on_every_routing() {
    for strategy in [Strategy::Gate, Strategy::Optimistic, Strategy::Auto] {
        let ledger = InMemoryLedger::new();
        ledger.set_contention_window(true);
        let gate = InMemoryFastGate::new();
        let service = service(&ledger, &gate, EngineConfig::default());
        let item = service.create_item("Flash sale", CAPACITY).await.unwrap();

        let tally = run_sale(&service, strategy, item.id, 5).await;

        assert_eq!(tally.confirmed, CAPACITY, "{strategy}: {tally:?}");
        assert_eq!(tally.sold_out + tally.contention, 90, "{strategy}: {tally:?}");
        assert_eq!(tally.gate_unavailable, 0);
        assert_eq!(ledger.item(item.id).unwrap().remaining, 0);
        assert_eq!(ledger.reservations().len(), 10);
        if strategy != Strategy::Optimistic {
            assert_eq!(tally.contention, 0, "{strategy}: {tally:?}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn optimistic_allocator_amplifies_ledger_writes() {
    init_test_tracing();
    let ledger = InMemoryLedger::new();
    ledger.set_contention_window(true);
    let gate = InMemoryFastGate::new();
    let service = service(&ledger, &gate, EngineConfig::default());
    let item = service.create_item("Flash sale", CAPACITY).await.unwrap();

    // Bursts of five requesters collide on the same version.
    let tally = run_sale(&service, Strategy::Optimistic, item.id, 5).await;

    assert_eq!(tally.confirmed, CAPACITY);
    assert_eq!(tally.sold_out + tally.contention, 90);
    assert!(tally.contention > 0);
    assert!(ledger.stats().writes > u64::from(CAPACITY));
    assert_eq!(ledger.item(item.id).unwrap().remaining, 0);
    assert_eq!(gate.stats().admits, 0);

    let metrics = service.metrics();
    assert_eq!(metrics.rejected_contention, u64::from(tally.contention));
    assert!(metrics.version_conflicts > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_overbook() {
    for strategy in [Strategy::Gate, Strategy::Optimistic, Strategy::Auto] {
        let ledger = InMemoryLedger::new();
        ledger.set_contention_window(true);
        let gate = InMemoryFastGate::new();
        let config = EngineConfig::default().with_gate_timeout(Duration::from_secs(1));
        let service = service(&ledger, &gate, config);
        let item = service.create_item("Flash sale", CAPACITY).await.unwrap();
        let item_id = item.id;

        let handles: Vec<_> = (0..REQUESTERS)
            .map(|i| {
                let service = Arc::clone(&service);
                let quantity = Quantity::new(u32::try_from(i % 3 + 1).unwrap()).unwrap();
                tokio::spawn(async move {
                    service
                        .reserve_with(strategy, item_id, RequesterId::new(i), quantity)
                        .await
                })
            })
            .collect();

        let mut seats = 0;
        for handle in handles {
            if let ReserveOutcome::Confirmed(r) = handle.await.unwrap().unwrap() {
                seats += r.quantity.get();
            }
        }

        let after = ledger.item(item.id).unwrap();
        assert!(seats <= CAPACITY, "{strategy}: {seats} seats confirmed");
        assert_eq!(after.remaining, CAPACITY - seats);
        assert_eq!(after.version.value(), ledger.stats().successful_writes);
        assert_eq!(gate.snapshot(item.id).provisional, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn crashed_holder_is_reclaimed_by_ttl() {
    let ledger = InMemoryLedger::new();
    let gate = InMemoryFastGate::new();
    let service = service(&ledger, &gate, EngineConfig::default());
    let item = service.create_item("Last seat", 1).await.unwrap();

    // A client admits and then dies before Phase 2.
    gate.admit_and_reserve(item.id, Quantity::ONE, Duration::from_secs(30))
        .await
        .unwrap();

    let blocked = service
        .reserve(item.id, RequesterId::new(2), Quantity::ONE)
        .await
        .unwrap();
    assert_eq!(blocked, ReserveOutcome::Rejected(RejectReason::SoldOut));
    assert_eq!(ledger.stats().reads, 0);

    tokio::time::advance(Duration::from_secs(31)).await;

    let outcome = service
        .reserve(item.id, RequesterId::new(2), Quantity::ONE)
        .await
        .unwrap();
    assert!(outcome.is_confirmed());
}

#[tokio::test(start_paused = true)]
async fn later_admissions_extend_a_crashed_hold() {
    let ledger = InMemoryLedger::new();
    let gate = InMemoryFastGate::new();
    let service = service(&ledger, &gate, EngineConfig::default());
    let item = service.create_item("Two seats", 2).await.unwrap();

    // Crashed holder at t=0.
    gate.admit_and_reserve(item.id, Quantity::ONE, Duration::from_secs(30))
        .await
        .unwrap();

    // A live sale at t=20 refreshes the item's provisional TTL to t=50.
    tokio::time::advance(Duration::from_secs(20)).await;
    let sold = service
        .reserve(item.id, RequesterId::new(1), Quantity::ONE)
        .await
        .unwrap();
    assert!(sold.is_confirmed());

    // Past the crashed hold's own TTL, the seat is still held.
    tokio::time::advance(Duration::from_secs(15)).await;
    let blocked = service
        .reserve(item.id, RequesterId::new(2), Quantity::ONE)
        .await
        .unwrap();
    assert_eq!(blocked, ReserveOutcome::Rejected(RejectReason::SoldOut));
    assert_eq!(ledger.item(item.id).unwrap().remaining, 1);

    // One TTL after the last admission the leak is gone.
    tokio::time::advance(Duration::from_secs(16)).await;
    assert_eq!(gate.snapshot(item.id).provisional, 0);
    let outcome = service
        .reserve(item.id, RequesterId::new(2), Quantity::ONE)
        .await
        .unwrap();
    assert!(outcome.is_confirmed());
    assert_eq!(ledger.item(item.id).unwrap().remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn callers_cancelled_during_admission_leave_no_holds() {
    const SEATS: u32 = 1_000_000;
    let ledger = InMemoryLedger::new();
    let gate = InMemoryFastGate::new();
    let config = EngineConfig::default().with_gate_timeout(Duration::from_secs(1));
    let service = service(&ledger, &gate, config);
    let item = service.create_item("Open sale", SEATS).await.unwrap();
    let item_id = item.id;

    let handles: Vec<_> = (0..2_000)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                // Gives up after the first poll, wherever that leaves the request.
                let request =
                    service.reserve_with(Strategy::Gate, item_id, RequesterId::new(i), Quantity::ONE);
                let _ = tokio::time::timeout(Duration::ZERO, request).await;
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while gate.snapshot(item_id).provisional > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let counters = gate.snapshot(item_id);
    let remaining = ledger.item(item_id).unwrap().remaining;
    assert_eq!(counters.provisional, 0);
    assert_eq!(counters.capacity, Some(u64::from(remaining)));
    assert_eq!(
        usize::try_from(remaining).unwrap() + ledger.reservations().len(),
        usize::try_from(SEATS).unwrap()
    );
}

#[tokio::test]
async fn abandoned_request_still_settles_its_hold() {
    let ledger = InMemoryLedger::new();
    ledger.set_contention_window(true);
    let gate = InMemoryFastGate::new();
    let service = service(&ledger, &gate, EngineConfig::default());
    let item = service.create_item("Flash sale", 2).await.unwrap();

    // One poll: Phase 1 admits, Phase 2 is spawned, then the caller walks away.
    let polled = service
        .reserve(item.id, RequesterId::new(1), Quantity::ONE)
        .now_or_never();
    assert!(polled.is_none());
    assert_eq!(gate.snapshot(item.id).provisional, 1);

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    assert_eq!(ledger.item(item.id).unwrap().remaining, 1);
    let counters = gate.snapshot(item.id);
    assert_eq!(counters.provisional, 0);
    assert_eq!(counters.capacity, Some(1));
    assert_eq!(gate.stats().folds, 1);
}

#[tokio::test(start_paused = true)]
async fn unhealthy_gate_is_bypassed_then_restored() {
    init_test_tracing();
    let ledger = InMemoryLedger::new();
    let gate = InMemoryFastGate::new();
    let degradation = DegradationConfig {
        min_samples: 5,
        cooldown: Duration::from_secs(30),
        probe_interval: Duration::from_secs(1),
        ..DegradationConfig::default()
    };
    let service = service(
        &ledger,
        &gate,
        EngineConfig::default().with_degradation(degradation),
    );
    let item = service.create_item("Flash sale", 50).await.unwrap();

    gate.set_failure(Some(GateError::Unavailable("connection reset".into())));
    for i in 0..5 {
        let outcome = service
            .reserve(item.id, RequesterId::new(i), Quantity::ONE)
            .await
            .unwrap();
        // Fallback keeps serving while the gate is down.
        assert!(outcome.is_confirmed());
    }
    assert_eq!(service.mode().await, GateMode::Bypassed);

    let errors_before = gate.stats().errors;
    service
        .reserve(item.id, RequesterId::new(9), Quantity::ONE)
        .await
        .unwrap();
    assert_eq!(gate.stats().errors, errors_before, "bypassed requests skip the gate");

    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
    service.start_background(&mut coordinator);

    // Still failing: probes keep the gate bypassed.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(service.mode().await, GateMode::Bypassed);

    gate.set_failure(None);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(service.mode().await, GateMode::Bypassed, "cooldown not yet served");

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(service.mode().await, GateMode::Active);

    coordinator.shutdown().await.unwrap();
    let metrics = service.metrics();
    assert_eq!(metrics.bypass_transitions, 1);
    assert_eq!(metrics.recover_transitions, 1);
    assert!(metrics.reconcile_runs >= 1);
}
