//! Integration tests for `RedisFastGate` using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running. The tests start a Redis container and are
//! `#[ignore]`d by default; run them with `cargo test -p seatgate-redis -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use seatgate_core::gate::{Admission, FastGate};
use seatgate_core::inventory::{ItemId, Quantity, RequesterId};
use seatgate_core::outcome::{RejectReason, ReserveOutcome};
use seatgate_redis::{RedisConfig, RedisFastGate};
use seatgate_runtime::config::EngineConfig;
use seatgate_runtime::service::{ReservationService, Strategy};
use seatgate_testing::InMemoryLedger;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;

const TTL: Duration = Duration::from_secs(30);

async fn setup_gate() -> (ContainerAsync<Redis>, RedisFastGate) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");

    let config = RedisConfig::default().with_url(format!("redis://127.0.0.1:{port}"));
    let gate = RedisFastGate::connect(&config)
        .await
        .expect("Failed to connect to redis");
    (container, gate)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unprimed_item_is_reported() {
    let (_container, gate) = setup_gate().await;

    let admission = gate
        .admit_and_reserve(ItemId::new(1), Quantity::ONE, TTL)
        .await
        .unwrap();
    assert_eq!(admission, Admission::Unprimed);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn admission_stops_at_capacity() {
    let (_container, gate) = setup_gate().await;
    let item = ItemId::new(1);
    gate.set_capacity(item, 2).await.unwrap();

    for _ in 0..2 {
        let admission = gate.admit_and_reserve(item, Quantity::ONE, TTL).await.unwrap();
        assert_eq!(admission, Admission::Admitted);
    }
    let rejected = gate.admit_and_reserve(item, Quantity::ONE, TTL).await.unwrap();
    assert_eq!(rejected, Admission::Rejected { available: 0 });

    let counters = gate.counters(item).await.unwrap();
    assert_eq!(counters.capacity, Some(2));
    assert_eq!(counters.provisional, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn release_and_fold_floor_at_zero() {
    let (_container, gate) = setup_gate().await;
    let item = ItemId::new(1);
    gate.set_capacity(item, 5).await.unwrap();
    gate.admit_and_reserve(item, Quantity::new(2).unwrap(), TTL)
        .await
        .unwrap();

    gate.fold(item, Quantity::ONE).await.unwrap();
    let counters = gate.counters(item).await.unwrap();
    assert_eq!(counters.capacity, Some(4));
    assert_eq!(counters.provisional, 1);

    gate.release(item, Quantity::new(3).unwrap()).await.unwrap();
    assert_eq!(gate.counters(item).await.unwrap().provisional, 0);

    gate.set_capacity(item, 0).await.unwrap();
    gate.fold(item, Quantity::ONE).await.unwrap();
    assert_eq!(gate.counters(item).await.unwrap().capacity, Some(0));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn provisional_hold_expires_with_its_ttl() {
    let (_container, gate) = setup_gate().await;
    let item = ItemId::new(1);
    gate.set_capacity(item, 1).await.unwrap();

    gate.admit_and_reserve(item, Quantity::ONE, Duration::from_millis(200))
        .await
        .unwrap();
    let blocked = gate.admit_and_reserve(item, Quantity::ONE, TTL).await.unwrap();
    assert!(matches!(blocked, Admission::Rejected { .. }));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let admitted = gate.admit_and_reserve(item, Quantity::ONE, TTL).await.unwrap();
    assert_eq!(admitted, Admission::Admitted);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn gate_sale_confirms_exactly_capacity() {
    let (_container, gate) = setup_gate().await;
    let ledger = InMemoryLedger::new();
    let service = Arc::new(ReservationService::new(
        Arc::new(ledger.clone()),
        Arc::new(gate.clone()),
        EngineConfig::default().with_gate_timeout(Duration::from_secs(1)),
    ));
    let item = service.create_item("Flash sale", 10).await.unwrap();
    let item_id = item.id;

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .reserve_with(Strategy::Gate, item_id, RequesterId::new(i), Quantity::ONE)
                    .await
            })
        })
        .collect();

    let mut confirmed = 0;
    let mut sold_out = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReserveOutcome::Confirmed(_) => confirmed += 1,
            ReserveOutcome::Rejected(RejectReason::SoldOut) => sold_out += 1,
            ReserveOutcome::Rejected(_) => {}
        }
    }

    assert_eq!(confirmed, 10);
    assert_eq!(sold_out, 90);
    assert!(ledger.stats().writes <= 10);
    assert_eq!(gate.counters(item_id).await.unwrap().provisional, 0);
}
