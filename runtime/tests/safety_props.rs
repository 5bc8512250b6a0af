//! Property tests for the no-overbooking invariant.
//!
//! Random capacities and request quantities, every routing strategy, a
//! ledger that widens the read-to-write race: confirmed seats never exceed
//! capacity and the ledger always accounts for exactly the confirmed seats.
//! Single-seat requests through the gate sell out exactly, however they
//! interleave.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use seatgate_core::inventory::{Quantity, RequesterId};
use seatgate_core::outcome::ReserveOutcome;
use seatgate_runtime::config::EngineConfig;
use seatgate_runtime::service::{ReservationService, Strategy as Routing};
use seatgate_testing::{InMemoryFastGate, InMemoryLedger, test_clock};
use std::sync::Arc;
use tokio_test::block_on;

fn arb_routing() -> impl Strategy<Value = Routing> {
    prop::sample::select(vec![Routing::Gate, Routing::Optimistic, Routing::Auto])
}

struct SaleResult {
    confirmed_seats: u32,
    reservation_rows: usize,
    remaining: u32,
    provisional: u64,
}

fn run_sale(capacity: u32, quantities: &[u32], routing: Routing) -> SaleResult {
    block_on(async {
        let ledger = InMemoryLedger::new();
        ledger.set_contention_window(true);
        let gate = InMemoryFastGate::new();
        let service = Arc::new(ReservationService::with_clock(
            Arc::new(ledger.clone()),
            Arc::new(gate.clone()),
            EngineConfig::default(),
            Arc::new(test_clock()),
        ));
        let item = service.create_item("Property sale", capacity).await.unwrap();
        let item_id = item.id;

        let handles: Vec<_> = quantities
            .iter()
            .enumerate()
            .map(|(i, &q)| {
                let service = Arc::clone(&service);
                let requester = RequesterId::new(i64::try_from(i).unwrap());
                let quantity = Quantity::new(q).unwrap();
                tokio::spawn(async move {
                    service
                        .reserve_with(routing, item_id, requester, quantity)
                        .await
                })
            })
            .collect();

        let mut confirmed_seats = 0;
        for handle in handles {
            if let ReserveOutcome::Confirmed(r) = handle.await.unwrap().unwrap() {
                confirmed_seats += r.quantity.get();
            }
        }

        SaleResult {
            confirmed_seats,
            reservation_rows: ledger.reservations().len(),
            remaining: ledger.item(item_id).unwrap().remaining,
            provisional: gate.snapshot(item_id).provisional,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_confirmed_seats_never_exceed_capacity(
        capacity in 0u32..20,
        quantities in prop::collection::vec(1u32..4, 1..40),
        routing in arb_routing(),
    ) {
        let result = run_sale(capacity, &quantities, routing);

        prop_assert!(result.confirmed_seats <= capacity);
        prop_assert_eq!(result.remaining, capacity - result.confirmed_seats);
        prop_assert_eq!(result.provisional, 0);
    }

    #[test]
    fn prop_unit_requests_through_the_gate_sell_out_exactly(
        capacity in 0u32..20,
        requests in 1usize..40,
        routing in prop::sample::select(vec![Routing::Gate, Routing::Auto]),
    ) {
        let result = run_sale(capacity, &vec![1; requests], routing);
        let expected = capacity.min(u32::try_from(requests).unwrap());

        prop_assert_eq!(result.confirmed_seats, expected);
        prop_assert_eq!(result.remaining, capacity - expected);
        prop_assert_eq!(result.provisional, 0);
    }

    #[test]
    fn prop_every_confirmation_has_one_ledger_row(
        capacity in 1u32..20,
        quantities in prop::collection::vec(1u32..4, 1..40),
        routing in arb_routing(),
    ) {
        let result = run_sale(capacity, &quantities, routing);
        let confirmed_rows = usize::try_from(result.confirmed_seats).unwrap();

        // Each row holds at least one seat and at most three.
        prop_assert!(result.reservation_rows <= confirmed_rows);
        prop_assert!(result.reservation_rows * 3 >= confirmed_rows);
    }
}
