//! Checkout boundary: order creation, compensation and payment events.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Duration;
use raffle_core::environment::Clock;
use raffle_core::{Ledger, Money, OrderId, OrderStatus, PaymentStatus, PriceTiers, ReleaseReason};
use raffle_runtime::{
    Checkout, CheckoutError, OrderLifecycle, PaymentEventOutcome, RetryPolicy, TicketLookup,
    TicketState,
};
use raffle_testing::{
    FixedClock, InMemoryLedger, RecordingNotifier, ScriptedPaymentProvider, test_clock,
};
use std::sync::Arc;

struct Harness {
    ledger: InMemoryLedger,
    provider: ScriptedPaymentProvider,
    notifier: RecordingNotifier,
    clock: FixedClock,
    checkout: Checkout,
}

async fn harness(total: u32) -> Harness {
    let clock = test_clock();
    let ledger = InMemoryLedger::with_clock(Arc::new(clock.clone()));
    ledger.seed(total).await.unwrap();
    let provider = ScriptedPaymentProvider::new();
    let notifier = RecordingNotifier::new();
    let checkout = Checkout::new(
        OrderLifecycle::new(Arc::new(ledger.clone())),
        Arc::new(provider.clone()),
        Arc::new(notifier.clone()),
        Arc::new(clock.clone()),
        "1:2000.00,5:1800.00,10:1500.00".parse::<PriceTiers>().unwrap(),
        Duration::minutes(60),
    )
    .with_retry(RetryPolicy::none());
    Harness {
        ledger,
        provider,
        notifier,
        clock,
        checkout,
    }
}

#[tokio::test]
async fn create_order_reserves_prices_and_opens_checkout() {
    let h = harness(100).await;

    let created = h.checkout.create_order(5, " buyer@example.com ").await.unwrap();

    assert_eq!(created.ticket_numbers.len(), 5);
    assert_eq!(created.total, Money::from_units(9_000));
    assert_eq!(created.expires_at, h.clock.now() + Duration::minutes(60));
    assert_eq!(
        created.checkout_url,
        format!("https://checkout.test/{}", created.order_id)
    );

    let requests = h.provider.preferences();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].order_id, created.order_id);
    assert_eq!(requests[0].quantity, 5);
    assert_eq!(requests[0].total, created.total);
    assert_eq!(requests[0].expires_at, created.expires_at);

    let order = h.checkout.order(created.order_id).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::Pending);
    assert_eq!(order.order.email, "buyer@example.com");
    assert_eq!(order.order.amount, created.total);
    assert_eq!(order.active_numbers(), created.ticket_numbers);
}

#[tokio::test]
async fn insufficient_stock_is_reported_and_nothing_persists() {
    let h = harness(3).await;

    let err = h.checkout.create_order(4, "buyer@example.com").await.unwrap_err();

    assert_eq!(err.code(), "INSUFFICIENT_STOCK");
    assert!(matches!(
        err,
        CheckoutError::InsufficientStock {
            requested: 4,
            available: 3
        }
    ));
    assert!(h.provider.preferences().is_empty());
    assert!(h.ledger.list_orders(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn bad_input_is_rejected_before_reserving() {
    let h = harness(10).await;

    let quantity = h.checkout.create_order(0, "buyer@example.com").await.unwrap_err();
    let email = h.checkout.create_order(1, "not-an-email").await.unwrap_err();

    assert_eq!(quantity.code(), "INVALID_QUANTITY");
    assert_eq!(email.code(), "INVALID_EMAIL");
    assert_eq!(h.ledger.availability_count().await.unwrap(), 10);
}

#[tokio::test]
async fn provider_failure_cancels_and_releases() {
    let h = harness(5).await;
    h.provider.fail_preferences(true);

    let err = h.checkout.create_order(5, "buyer@example.com").await.unwrap_err();

    assert_eq!(err.code(), "INTERNAL_ERROR");
    assert_eq!(h.ledger.availability_count().await.unwrap(), 5);
    let orders = h.ledger.list_orders(10, 0).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].order.status, OrderStatus::Cancelled);
    assert!(
        orders[0]
            .reservations
            .iter()
            .all(|r| r.release_reason == Some(ReleaseReason::Cancelled))
    );

    h.provider.fail_preferences(false);
    let retry = h.checkout.create_order(5, "buyer@example.com").await.unwrap();
    assert_eq!(retry.ticket_numbers.len(), 5);
}

#[tokio::test]
async fn approved_event_pays_and_notifies_once() {
    let h = harness(10).await;
    let created = h.checkout.create_order(2, "buyer@example.com").await.unwrap();
    h.provider.approve(created.order_id, "pay-1");

    let first = h.checkout.report_payment_event("pay-1").await.unwrap();
    let second = h.checkout.report_payment_event("pay-1").await.unwrap();

    assert_eq!(
        first,
        PaymentEventOutcome::Approved {
            order_id: created.order_id,
            changed: true
        }
    );
    assert_eq!(
        second,
        PaymentEventOutcome::Approved {
            order_id: created.order_id,
            changed: false
        }
    );
    let sent = h.notifier.sent_for(created.order_id);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ticket_numbers, created.ticket_numbers);
    assert_eq!(sent[0].to_email, "buyer@example.com");
}

#[tokio::test]
async fn rejected_event_closes_the_order() {
    let h = harness(4).await;
    let created = h.checkout.create_order(4, "buyer@example.com").await.unwrap();
    h.provider
        .set_status(created.order_id, "pay-1", PaymentStatus::Rejected);

    let outcome = h.checkout.report_payment_event("pay-1").await.unwrap();

    assert_eq!(
        outcome,
        PaymentEventOutcome::Failed {
            order_id: created.order_id,
            reason: ReleaseReason::Error,
            changed: true
        }
    );
    assert_eq!(h.ledger.availability_count().await.unwrap(), 4);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn late_approval_after_expiry_changes_nothing() {
    let h = harness(4).await;
    let created = h.checkout.create_order(2, "buyer@example.com").await.unwrap();
    h.provider
        .set_status(created.order_id, "pay-1", PaymentStatus::Expired);
    h.checkout.report_payment_event("pay-1").await.unwrap();

    h.provider.approve(created.order_id, "pay-2");
    let outcome = h.checkout.report_payment_event("pay-2").await.unwrap();

    assert_eq!(
        outcome,
        PaymentEventOutcome::Approved {
            order_id: created.order_id,
            changed: false
        }
    );
    let order = h.checkout.order(created.order_id).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::Expired);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn pending_event_records_the_reference() {
    let h = harness(4).await;
    let created = h.checkout.create_order(1, "buyer@example.com").await.unwrap();
    h.provider
        .set_status(created.order_id, "pay-3", PaymentStatus::Pending);

    let outcome = h.checkout.report_payment_event("pay-3").await.unwrap();

    assert_eq!(
        outcome,
        PaymentEventOutcome::Pending {
            order_id: created.order_id,
            changed: true
        }
    );
    let order = h.checkout.order(created.order_id).await.unwrap().order;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_ref.as_deref(), Some("pay-3"));
}

#[tokio::test]
async fn events_without_a_known_order_are_ignored() {
    let h = harness(4).await;

    // Unknown payment.
    assert_eq!(
        h.checkout.report_payment_event("missing").await.unwrap(),
        PaymentEventOutcome::Ignored
    );

    // Payment for an order this ledger never created.
    h.provider.approve(OrderId::new(), "pay-foreign");
    assert_eq!(
        h.checkout.report_payment_event("pay-foreign").await.unwrap(),
        PaymentEventOutcome::Ignored
    );

    // Unreadable reference.
    h.provider.insert_payment(raffle_core::ProviderPayment {
        id: "pay-garbled".to_string(),
        status: PaymentStatus::Approved,
        external_order_ref: Some("not-a-uuid".to_string()),
        amount: Money::ZERO,
    });
    assert_eq!(
        h.checkout.report_payment_event("pay-garbled").await.unwrap(),
        PaymentEventOutcome::Ignored
    );
}

#[tokio::test]
async fn provider_outage_during_event_is_an_error() {
    let h = harness(4).await;
    h.provider.fail_payment_ref("pay-1");

    let err = h.checkout.report_payment_event("pay-1").await.unwrap_err();

    assert_eq!(err.code(), "INTERNAL_ERROR");
}

#[tokio::test]
async fn unknown_order_lookup_is_not_found() {
    let h = harness(4).await;
    let err = h.checkout.order(OrderId::new()).await.unwrap_err();
    assert_eq!(err.code(), "ORDER_NOT_FOUND");
}

#[tokio::test]
async fn lookup_reflects_checkout_progress() {
    let h = harness(50).await;
    let lookup = TicketLookup::new(Arc::new(h.ledger.clone()), 50);
    let paid = h.checkout.create_order(1, "paid@example.com").await.unwrap();
    let held = h.checkout.create_order(1, "held@example.com").await.unwrap();
    h.provider.approve(paid.order_id, "pay-1");
    h.checkout.report_payment_event("pay-1").await.unwrap();

    let inputs = vec![
        paid.ticket_numbers[0].to_string(),
        held.ticket_numbers[0].to_string(),
        "75".to_string(),
    ];
    let report = lookup.status(&inputs).await.unwrap();

    assert_eq!(report.tickets[0].state, TicketState::Paid);
    assert!(report.tickets[0].sold);
    assert_eq!(
        report.tickets[0].order.as_ref().unwrap().email,
        "paid@example.com"
    );
    assert_eq!(report.tickets[1].state, TicketState::Pending);
    assert_eq!(report.tickets[2].state, TicketState::NotFound);
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.sold, 1);
}
