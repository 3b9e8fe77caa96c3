//! Order lifecycle behaviour over the in-memory ledger.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration, Utc};
use futures::future::join_all;
use raffle_core::{Ledger, Money, OrderStatus, ReleaseReason};
use raffle_runtime::{CreateOutcome, OrderLifecycle};
use raffle_testing::InMemoryLedger;
use std::collections::HashSet;
use std::sync::Arc;

async fn seeded(total: u32) -> (OrderLifecycle, InMemoryLedger) {
    let ledger = InMemoryLedger::new();
    ledger.seed(total).await.unwrap();
    (OrderLifecycle::new(Arc::new(ledger.clone())), ledger)
}

async fn create(lifecycle: &OrderLifecycle, quantity: u32) -> CreateOutcome {
    lifecycle
        .create_preference_flow(
            quantity,
            "buyer@example.com",
            Utc::now() + Duration::minutes(60),
            Money::from_units(2_000),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn pool_of_five_scenario() {
    let (lifecycle, ledger) = seeded(5).await;

    let CreateOutcome::Reserved {
        order_id: a,
        numbers: a_numbers,
    } = create(&lifecycle, 3).await
    else {
        panic!("A should get three tickets");
    };
    assert_eq!(a_numbers.len(), 3);

    let outcome = create(&lifecycle, 3).await;
    assert_eq!(
        outcome,
        CreateOutcome::InsufficientStock {
            requested: 3,
            available: 2
        }
    );
    assert_eq!(ledger.list_orders(10, 0).await.unwrap().len(), 1);

    let released = lifecycle
        .handle_payment_failed_or_expired(a, ReleaseReason::Expired)
        .await
        .unwrap();
    assert_eq!(released.changed, 1);
    assert_eq!(released.released, 3);
    assert_eq!(ledger.availability_count().await.unwrap(), 5);

    let CreateOutcome::Reserved {
        order_id: b,
        numbers: b_numbers,
    } = create(&lifecycle, 3).await
    else {
        panic!("B should get three tickets after the release");
    };
    assert_eq!(b_numbers.len(), 3);

    let a_details = ledger.get(a).await.unwrap().unwrap();
    assert_eq!(a_details.order.status, OrderStatus::Expired);
    assert!(a_details.active_numbers().is_empty());
    assert_eq!(a_details.all_numbers(), a_numbers);
    assert_eq!(
        ledger.get(b).await.unwrap().unwrap().order.status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn concurrent_creations_never_share_a_ticket() {
    let (lifecycle, ledger) = seeded(20).await;

    let attempts = (0..12).map(|_| {
        let lifecycle = lifecycle.clone();
        async move { create(&lifecycle, 2).await }
    });
    let outcomes = join_all(attempts).await;

    let mut seen = HashSet::new();
    let mut reserved = 0;
    for outcome in outcomes {
        match outcome {
            CreateOutcome::Reserved { numbers, .. } => {
                reserved += 1;
                for number in numbers {
                    assert!(seen.insert(number), "ticket reserved twice");
                }
            }
            CreateOutcome::InsufficientStock { requested, .. } => assert_eq!(requested, 2),
        }
    }

    assert_eq!(reserved, 10);
    assert!(ledger.open_reservations_per_ticket().values().all(|&n| n == 1));
    assert_eq!(ledger.availability_count().await.unwrap(), 0);
}

#[tokio::test]
async fn short_pool_persists_nothing() {
    let (lifecycle, ledger) = seeded(4).await;

    let outcome = create(&lifecycle, 5).await;

    assert_eq!(
        outcome,
        CreateOutcome::InsufficientStock {
            requested: 5,
            available: 4
        }
    );
    assert!(ledger.list_orders(10, 0).await.unwrap().is_empty());
    assert_eq!(ledger.availability_count().await.unwrap(), 4);
}

#[tokio::test]
async fn released_tickets_can_be_reserved_again() {
    let (lifecycle, ledger) = seeded(2).await;

    let CreateOutcome::Reserved {
        order_id: first,
        numbers,
    } = create(&lifecycle, 2).await
    else {
        panic!("expected a reservation");
    };
    lifecycle
        .handle_payment_failed_or_expired(first, ReleaseReason::Error)
        .await
        .unwrap();

    let CreateOutcome::Reserved {
        numbers: again, ..
    } = create(&lifecycle, 2).await
    else {
        panic!("released tickets should be reservable");
    };
    assert_eq!(again, numbers);

    let history = ledger.get(first).await.unwrap().unwrap();
    assert_eq!(history.order.status, OrderStatus::Error);
    assert!(
        history
            .reservations
            .iter()
            .all(|r| r.release_reason == Some(ReleaseReason::Error))
    );
}

#[tokio::test]
async fn first_transition_wins() {
    let (lifecycle, ledger) = seeded(3).await;
    let CreateOutcome::Reserved { order_id, numbers } = create(&lifecycle, 3).await else {
        panic!("expected a reservation");
    };

    let expire = lifecycle.handle_payment_failed_or_expired(order_id, ReleaseReason::Expired);
    let approve = lifecycle.handle_payment_approved(order_id, "pay-1", Money::from_units(6_000));
    let (expired, approved) = tokio::join!(expire, approve);
    let expired = expired.unwrap();
    let approved = approved.unwrap();

    // Exactly one of the two callers moved the order.
    assert_eq!(expired.changed + u64::from(approved.changed), 1);

    let details = ledger.get(order_id).await.unwrap().unwrap();
    if approved.changed {
        assert_eq!(details.order.status, OrderStatus::Paid);
        assert_eq!(details.active_numbers(), numbers);
    } else {
        assert_eq!(details.order.status, OrderStatus::Expired);
        assert!(details.active_numbers().is_empty());
    }
}

#[tokio::test]
async fn paid_amount_replaces_the_quote() {
    let (lifecycle, ledger) = seeded(10).await;
    let CreateOutcome::Reserved { order_id, .. } = create(&lifecycle, 1).await else {
        panic!("expected a reservation");
    };
    assert_eq!(
        ledger.get(order_id).await.unwrap().unwrap().order.amount,
        Money::from_units(2_000)
    );

    lifecycle
        .handle_payment_approved(order_id, "pay-9", Money::from_cents(199_950))
        .await
        .unwrap();

    let order = ledger.get(order_id).await.unwrap().unwrap().order;
    assert_eq!(order.amount, Money::from_cents(199_950));
    assert_eq!(order.payment_ref.as_deref(), Some("pay-9"));

    let stats = ledger.stats().await.unwrap();
    assert_eq!(stats.sold, 1);
    assert_eq!(stats.revenue, Money::from_cents(199_950));
}

#[tokio::test]
async fn ledger_failure_surfaces_as_an_error() {
    let (lifecycle, ledger) = seeded(5).await;
    ledger.set_unavailable(true);

    let result = lifecycle
        .create_preference_flow(1, "buyer@example.com", Utc::now(), Money::ZERO)
        .await;

    assert!(result.is_err());
    ledger.set_unavailable(false);
    assert_eq!(ledger.availability_count().await.unwrap(), 5);
    assert!(ledger.list_orders(10, 0).await.unwrap().is_empty());
}

