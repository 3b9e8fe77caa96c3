//! Recording purchase notifier.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Mutex poisoning only follows a panicking test

use raffle_core::notify::NotifyFuture;
use raffle_core::{NotificationError, OrderId, PurchaseConfirmation, PurchaseNotifier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// [`PurchaseNotifier`] that keeps every confirmation it is asked to send.
///
/// Failed deliveries are recorded too, so tests can count attempts.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<PurchaseConfirmation>>>,
    should_fail: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create a notifier that delivers successfully
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries fail (or succeed again).
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Every confirmation attempted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<PurchaseConfirmation> {
        self.sent.lock().unwrap().clone()
    }

    /// Confirmations attempted for one order.
    #[must_use]
    pub fn sent_for(&self, order_id: OrderId) -> Vec<PurchaseConfirmation> {
        self.sent()
            .into_iter()
            .filter(|c| c.order_id == order_id)
            .collect()
    }
}

impl PurchaseNotifier for RecordingNotifier {
    fn send_purchase_confirmation(&self, confirmation: PurchaseConfirmation) -> NotifyFuture<'_> {
        Box::pin(async move {
            let order_id = confirmation.order_id;
            self.sent.lock().unwrap().push(confirmation);
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(NotificationError(format!(
                    "scripted delivery failure for order {order_id}"
                )));
            }
            Ok(())
        })
    }
}
