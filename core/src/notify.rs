//! Purchase notification boundary.
//!
//! Sent once per order, after the transition to `PAID` is committed. Delivery
//! failures are reported to the caller but never undo the transition.

use crate::money::Money;
use crate::order::OrderId;
use crate::ticket::TicketNumber;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Notification delivery error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// Boxed future returned by [`PurchaseNotifier`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + 'a>>;

/// Confirmation of a completed purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseConfirmation {
    /// Recipient
    pub to_email: String,
    /// Tickets bought
    pub ticket_numbers: Vec<TicketNumber>,
    /// Order paid
    pub order_id: OrderId,
    /// Amount paid
    pub amount: Money,
}

/// Purchase notifier.
///
/// This trait abstracts over delivery channels (SES, SMTP, console).
pub trait PurchaseNotifier: Send + Sync {
    /// Send the purchase confirmation.
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails.
    fn send_purchase_confirmation(&self, confirmation: PurchaseConfirmation) -> NotifyFuture<'_>;
}
