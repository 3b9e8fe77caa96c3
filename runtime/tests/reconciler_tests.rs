//! Reconciliation of expired holds against a scripted provider.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Duration as ChronoDuration;
use raffle_core::environment::Clock;
use raffle_core::{
    Ledger, Money, OrderId, OrderStatus, PaymentStatus, ProviderPayment, ReleaseReason,
    TicketNumber,
};
use raffle_runtime::{
    CreateOutcome, OrderLifecycle, ReconcileStats, Reconciler, ReconcilerConfig,
    ReconciliationLoop, RetryPolicy, TickOutcome,
};
use raffle_testing::{
    InMemoryLedger, ManualClock, RecordingNotifier, ScriptedPaymentProvider, test_clock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Harness {
    ledger: InMemoryLedger,
    provider: ScriptedPaymentProvider,
    notifier: RecordingNotifier,
    clock: ManualClock,
    lifecycle: OrderLifecycle,
}

impl Harness {
    async fn new(total: u32) -> Self {
        let clock = ManualClock::new(test_clock().now());
        let ledger = InMemoryLedger::with_clock(Arc::new(clock.clone()));
        ledger.seed(total).await.unwrap();
        Self {
            lifecycle: OrderLifecycle::new(Arc::new(ledger.clone())),
            ledger,
            provider: ScriptedPaymentProvider::new(),
            notifier: RecordingNotifier::new(),
            clock,
        }
    }

    fn reconciler(&self) -> Reconciler {
        let config = ReconcilerConfig {
            retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .jitter(false)
                .build(),
            ..ReconcilerConfig::default()
        };
        Reconciler::new(
            self.lifecycle.clone(),
            Arc::new(self.provider.clone()),
            Arc::new(self.notifier.clone()),
            Arc::new(self.clock.clone()),
            config,
        )
    }

    /// Create an order and let its hold lapse.
    async fn expired_order(&self, quantity: u32) -> (OrderId, Vec<TicketNumber>) {
        let outcome = self
            .lifecycle
            .create_preference_flow(
                quantity,
                "buyer@example.com",
                self.clock.now() + ChronoDuration::minutes(60),
                Money::from_units(2_000),
            )
            .await
            .unwrap();
        let CreateOutcome::Reserved { order_id, numbers } = outcome else {
            panic!("expected a reservation");
        };
        self.ledger
            .set_expires_at(order_id, self.clock.now() - ChronoDuration::minutes(1));
        (order_id, numbers)
    }

    async fn status(&self, order_id: OrderId) -> OrderStatus {
        self.ledger.get(order_id).await.unwrap().unwrap().order.status
    }
}

#[tokio::test]
async fn approved_payment_marks_paid_and_notifies_once() {
    let h = Harness::new(10).await;
    let (order_id, numbers) = h.expired_order(2).await;
    h.provider.insert_payment(ProviderPayment {
        id: "pay-1".to_string(),
        status: PaymentStatus::Approved,
        external_order_ref: Some(order_id.to_string()),
        amount: Money::from_units(4_000),
    });
    let reconciler = h.reconciler();

    let stats = reconciler.run_once().await.unwrap();

    assert_eq!(
        stats,
        ReconcileStats {
            processed: 1,
            paid: 1,
            ..ReconcileStats::default()
        }
    );
    let details = h.ledger.get(order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, OrderStatus::Paid);
    assert_eq!(details.order.amount, Money::from_units(4_000));
    assert_eq!(details.active_numbers(), numbers);

    let sent = h.notifier.sent_for(order_id);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ticket_numbers, numbers);

    // A paid order is never claimed again.
    h.clock.advance(ChronoDuration::minutes(10));
    let again = reconciler.run_once().await.unwrap();
    assert_eq!(again.processed, 0);
    assert_eq!(h.notifier.sent_for(order_id).len(), 1);
}

#[tokio::test]
async fn rejected_payment_releases_with_error() {
    let h = Harness::new(5).await;
    let (order_id, _) = h.expired_order(3).await;
    h.provider.set_status(order_id, "pay-1", PaymentStatus::Rejected);

    let stats = h.reconciler().run_once().await.unwrap();

    assert_eq!(stats.released, 1);
    assert_eq!(h.status(order_id).await, OrderStatus::Error);
    assert_eq!(h.ledger.availability_count().await.unwrap(), 5);
    let details = h.ledger.get(order_id).await.unwrap().unwrap();
    assert!(
        details
            .reservations
            .iter()
            .all(|r| r.release_reason == Some(ReleaseReason::Error))
    );
}

#[tokio::test]
async fn cancelled_payment_releases_as_cancelled() {
    let h = Harness::new(5).await;
    let (order_id, _) = h.expired_order(1).await;
    h.provider.set_status(order_id, "pay-1", PaymentStatus::Cancelled);

    h.reconciler().run_once().await.unwrap();

    assert_eq!(h.status(order_id).await, OrderStatus::Cancelled);
}

#[tokio::test]
async fn missing_payment_expires_the_order() {
    let h = Harness::new(5).await;
    let (order_id, _) = h.expired_order(2).await;

    let stats = h.reconciler().run_once().await.unwrap();

    assert_eq!(stats.released, 1);
    assert_eq!(h.status(order_id).await, OrderStatus::Expired);
    assert_eq!(h.ledger.availability_count().await.unwrap(), 5);
}

#[tokio::test]
async fn unknown_status_expires_the_order() {
    let h = Harness::new(5).await;
    let (order_id, _) = h.expired_order(1).await;
    h.provider.set_status(
        order_id,
        "pay-1",
        PaymentStatus::Other("charged_back".to_string()),
    );

    h.reconciler().run_once().await.unwrap();

    assert_eq!(h.status(order_id).await, OrderStatus::Expired);
}

#[tokio::test]
async fn in_flight_payment_keeps_the_hold_until_the_lease_lapses() {
    let h = Harness::new(5).await;
    let (order_id, numbers) = h.expired_order(2).await;
    h.provider.set_status(order_id, "pay-7", PaymentStatus::InProcess);
    let reconciler = h.reconciler();

    let stats = reconciler.run_once().await.unwrap();
    assert_eq!(stats.extended, 1);
    let details = h.ledger.get(order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, OrderStatus::Pending);
    assert_eq!(details.order.payment_ref.as_deref(), Some("pay-7"));
    assert_eq!(details.active_numbers(), numbers);

    // Still leased: the next tick leaves it alone.
    assert_eq!(reconciler.run_once().await.unwrap().processed, 0);

    // Lease lapsed and the payment went through, found via the stored reference.
    h.clock.advance(ChronoDuration::minutes(6));
    h.provider.insert_payment(ProviderPayment {
        id: "pay-7".to_string(),
        status: PaymentStatus::Approved,
        external_order_ref: None,
        amount: Money::from_units(4_000),
    });
    let stats = reconciler.run_once().await.unwrap();
    assert_eq!(stats.paid, 1);
    assert_eq!(h.status(order_id).await, OrderStatus::Paid);
}

#[tokio::test]
async fn lookup_failure_skips_only_that_order() {
    let h = Harness::new(10).await;
    let (broken, _) = h.expired_order(1).await;
    let (healthy, _) = h.expired_order(1).await;
    h.provider.fail_order(broken);
    h.provider.approve(healthy, "pay-2");

    let stats = h.reconciler().run_once().await.unwrap();

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.paid, 1);
    assert_eq!(h.status(broken).await, OrderStatus::Pending);
    assert_eq!(h.status(healthy).await, OrderStatus::Paid);
}

#[tokio::test]
async fn transient_lookup_failures_are_retried() {
    let h = Harness::new(5).await;
    let (order_id, _) = h.expired_order(1).await;
    h.provider.approve(order_id, "pay-1");
    h.provider.fail_next_lookups(2);

    let stats = h.reconciler().run_once().await.unwrap();

    assert_eq!(stats.paid, 1);
    assert_eq!(h.provider.lookup_count(), 3);
}

#[tokio::test]
async fn notifier_failure_does_not_undo_payment() {
    let h = Harness::new(5).await;
    let (order_id, _) = h.expired_order(1).await;
    h.provider.approve(order_id, "pay-1");
    h.notifier.set_should_fail(true);

    let stats = h.reconciler().run_once().await.unwrap();

    assert_eq!(stats.paid, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(h.status(order_id).await, OrderStatus::Paid);
}

#[tokio::test]
async fn unexpired_orders_are_left_alone() {
    let h = Harness::new(5).await;
    h.lifecycle
        .create_preference_flow(
            1,
            "buyer@example.com",
            h.clock.now() + ChronoDuration::minutes(60),
            Money::from_units(2_000),
        )
        .await
        .unwrap();

    let stats = h.reconciler().run_once().await.unwrap();

    assert_eq!(stats, ReconcileStats::default());
    assert_eq!(h.provider.lookup_count(), 0);
}

#[tokio::test]
async fn claim_failure_fails_the_tick() {
    let h = Harness::new(5).await;
    h.ledger.set_unavailable(true);
    let tick_loop = ReconciliationLoop::new(Arc::new(h.reconciler()), Duration::from_secs(60));

    assert!(matches!(tick_loop.tick().await, TickOutcome::Failed(_)));
    assert!(!tick_loop.is_running());
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let h = Harness::new(5).await;
    h.expired_order(1).await;
    h.provider.set_lookup_delay(Duration::from_millis(200));
    let tick_loop = ReconciliationLoop::new(Arc::new(h.reconciler()), Duration::from_secs(60));

    let slow = {
        let tick_loop = tick_loop.clone();
        tokio::spawn(async move { tick_loop.tick().await })
    };
    while !tick_loop.is_running() {
        tokio::task::yield_now().await;
    }

    assert!(matches!(tick_loop.tick().await, TickOutcome::Skipped));

    let TickOutcome::Completed(stats) = slow.await.unwrap() else {
        panic!("first tick should complete");
    };
    assert_eq!(stats.released, 1);
    assert!(!tick_loop.is_running());
}

#[tokio::test]
async fn loop_ticks_at_start_and_stops_on_shutdown() {
    let h = Harness::new(5).await;
    let (order_id, _) = h.expired_order(2).await;
    let tick_loop = ReconciliationLoop::new(Arc::new(h.reconciler()), Duration::from_secs(3600));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(tick_loop.clone().run(shutdown_rx));

    for _ in 0..100 {
        if h.status(order_id).await != OrderStatus::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.status(order_id).await, OrderStatus::Expired);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop")
        .unwrap();
    assert!(!tick_loop.is_running());
}
