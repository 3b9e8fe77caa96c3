//! Purchase notification helpers.

use crate::metrics::NotificationMetrics;
use raffle_core::notify::NotifyFuture;
use raffle_core::{OrderDetails, PurchaseConfirmation, PurchaseNotifier};
use tracing::{error, info};

/// Console purchase notifier.
///
/// Logs confirmations to the console instead of emailing them. Useful for
/// development and for running the worker without a mail provider.
#[derive(Clone, Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Create a new console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PurchaseNotifier for ConsoleNotifier {
    fn send_purchase_confirmation(&self, confirmation: PurchaseConfirmation) -> NotifyFuture<'_> {
        Box::pin(async move {
            let numbers = confirmation
                .ticket_numbers
                .iter()
                .map(raffle_core::TicketNumber::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            let to = &confirmation.to_email;
            let order_id = confirmation.order_id.to_string();
            let amount = confirmation.amount.to_string();

            info!(
                to = %to,
                order_id = %order_id,
                tickets = %numbers,
                "Purchase confirmation (console)"
            );
            println!("\n╔══════════════════════════════════════════════════════════════╗");
            println!("║                  PURCHASE CONFIRMATION                       ║");
            println!("╠══════════════════════════════════════════════════════════════╣");
            println!("║ To: {to:<57}║");
            println!("║ Order: {order_id:<54}║");
            println!("║ Amount: {amount:<53}║");
            println!("╠══════════════════════════════════════════════════════════════╣");
            println!("║ Your tickets:                                                ║");
            println!("║ {numbers:<61}║");
            println!("╚══════════════════════════════════════════════════════════════╝\n");

            Ok(())
        })
    }
}

/// Send the purchase confirmation for a freshly paid order.
///
/// Delivery failures are logged and counted, never propagated: the `PAID`
/// transition has already committed and must not be retried for them.
/// Returns whether delivery succeeded.
pub async fn notify_purchase(notifier: &dyn PurchaseNotifier, details: &OrderDetails) -> bool {
    let confirmation = PurchaseConfirmation {
        to_email: details.order.email.clone(),
        ticket_numbers: details.active_numbers(),
        order_id: details.order.id,
        amount: details.order.amount,
    };

    match notifier.send_purchase_confirmation(confirmation).await {
        Ok(()) => {
            info!(
                order_id = %details.order.id,
                to = %details.order.email,
                "Purchase confirmation sent"
            );
            true
        }
        Err(e) => {
            error!(
                order_id = %details.order.id,
                error = %e,
                "Purchase confirmation failed"
            );
            NotificationMetrics::record_failure();
            false
        }
    }
}
