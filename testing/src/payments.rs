//! Scripted payment provider.
//!
//! Tests register the payments the provider should report and inject
//! failures or latency; the provider records every checkout it is asked to
//! open.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Mutex poisoning only follows a panicking test

use raffle_core::payment::{PaymentProvider, ProviderFuture};
use raffle_core::{
    OrderId, PaymentProviderError, PaymentStatus, Preference, PreferenceRequest, ProviderPayment,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Script {
    payments: HashMap<String, ProviderPayment>,
    // Payment ids per order reference, oldest first.
    by_order: HashMap<String, Vec<String>>,
    failing_refs: HashSet<String>,
    failing_orders: HashSet<OrderId>,
    fail_preferences: bool,
    delay: Option<Duration>,
    preferences: Vec<PreferenceRequest>,
}

/// [`PaymentProvider`] whose answers are scripted by the test.
///
/// # Example
///
/// ```
/// use raffle_testing::ScriptedPaymentProvider;
/// use raffle_core::{OrderId, PaymentStatus};
///
/// let provider = ScriptedPaymentProvider::new();
/// let order_id = OrderId::new();
/// provider.approve(order_id, "pay-1");
/// assert_eq!(provider.lookup_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct ScriptedPaymentProvider {
    script: Arc<Mutex<Script>>,
    transient_failures: Arc<AtomicU32>,
    lookups: Arc<AtomicUsize>,
}

impl ScriptedPaymentProvider {
    /// Create a provider that knows no payments
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payment; later payments for the same order count as more recent.
    pub fn insert_payment(&self, payment: ProviderPayment) {
        let mut script = self.script.lock().unwrap();
        if let Some(order_ref) = payment.external_order_ref.clone() {
            let ids = script.by_order.entry(order_ref).or_default();
            ids.retain(|id| id != &payment.id);
            ids.push(payment.id.clone());
        }
        script.payments.insert(payment.id.clone(), payment);
    }

    /// Register a payment for `order_id` with the given status and zero amount.
    pub fn set_status(&self, order_id: OrderId, payment_ref: &str, status: PaymentStatus) {
        self.insert_payment(ProviderPayment {
            id: payment_ref.to_string(),
            status,
            external_order_ref: Some(order_id.to_string()),
            amount: raffle_core::Money::ZERO,
        });
    }

    /// Shorthand for an approved payment.
    pub fn approve(&self, order_id: OrderId, payment_ref: &str) {
        self.set_status(order_id, payment_ref, PaymentStatus::Approved);
    }

    /// Make preference creation fail.
    pub fn fail_preferences(&self, fail: bool) {
        self.script.lock().unwrap().fail_preferences = fail;
    }

    /// Make every lookup of this payment reference fail.
    pub fn fail_payment_ref(&self, payment_ref: &str) {
        self.script
            .lock()
            .unwrap()
            .failing_refs
            .insert(payment_ref.to_string());
    }

    /// Make every lookup of this order's payments fail.
    pub fn fail_order(&self, order_id: OrderId) {
        self.script.lock().unwrap().failing_orders.insert(order_id);
    }

    /// Fail the next `count` lookups with a transient error, then recover.
    pub fn fail_next_lookups(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every lookup, e.g. to keep a reconciliation tick running.
    pub fn set_lookup_delay(&self, delay: Duration) {
        self.script.lock().unwrap().delay = Some(delay);
    }

    /// Checkouts requested so far.
    #[must_use]
    pub fn preferences(&self) -> Vec<PreferenceRequest> {
        self.script.lock().unwrap().preferences.clone()
    }

    /// Number of payment lookups received, failed ones included.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    async fn begin_lookup(&self) -> Result<(), PaymentProviderError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = self.script.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PaymentProviderError::Unavailable(
                "scripted transient failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl PaymentProvider for ScriptedPaymentProvider {
    fn create_preference(&self, request: PreferenceRequest) -> ProviderFuture<'_, Preference> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            if script.fail_preferences {
                return Err(PaymentProviderError::Rejected {
                    status: 400,
                    message: "scripted preference failure".to_string(),
                });
            }
            let checkout_url = format!("https://checkout.test/{}", request.order_id);
            script.preferences.push(request);
            Ok(Preference { checkout_url })
        })
    }

    fn get_payment(&self, payment_ref: &str) -> ProviderFuture<'_, Option<ProviderPayment>> {
        let payment_ref = payment_ref.to_string();
        Box::pin(async move {
            self.begin_lookup().await?;
            let script = self.script.lock().unwrap();
            if script.failing_refs.contains(&payment_ref) {
                return Err(PaymentProviderError::Unavailable(format!(
                    "scripted failure for payment {payment_ref}"
                )));
            }
            Ok(script.payments.get(&payment_ref).cloned())
        })
    }

    fn find_latest_payment_for_order(
        &self,
        order_id: OrderId,
    ) -> ProviderFuture<'_, Option<ProviderPayment>> {
        Box::pin(async move {
            self.begin_lookup().await?;
            let script = self.script.lock().unwrap();
            if script.failing_orders.contains(&order_id) {
                return Err(PaymentProviderError::Unavailable(format!(
                    "scripted failure for order {order_id}"
                )));
            }
            Ok(script
                .by_order
                .get(&order_id.to_string())
                .and_then(|ids| ids.last())
                .and_then(|id| script.payments.get(id))
                .cloned())
        })
    }
}
