//! Checkout boundary.
//!
//! [`Checkout`] is what a request handler talks to. It validates and prices a
//! purchase, reserves tickets through the [`OrderLifecycle`], opens the
//! provider checkout outside any ledger unit, and turns provider payment
//! events into lifecycle transitions.
//!
//! Provider failures during checkout are compensated: the freshly created
//! order is cancelled and its tickets go back to the pool before the caller
//! sees a generic, retryable error.

use crate::lifecycle::{CreateOutcome, LifecycleError, OrderLifecycle};
use crate::notify::notify_purchase;
use crate::retry::{RetryPolicy, retry_transient};
use chrono::{DateTime, Utc};
use raffle_core::environment::Clock;
use raffle_core::{
    Money, OrderDetails, OrderId, PaymentProvider, PaymentProviderError, PaymentStatus,
    PreferenceRequest, PriceTiers, PurchaseNotifier, ReleaseReason, TicketNumber,
    TransitionOutcome,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Checkout error
#[derive(Error, Debug)]
pub enum CheckoutError {
    /// The pool cannot satisfy the quantity right now.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Tickets requested
        requested: u32,
        /// Tickets that could be claimed
        available: u32,
    },

    /// Quantity is zero or outside the price table.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    /// Email is missing or malformed.
    #[error("Invalid email")]
    InvalidEmail,

    /// No order with this id.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Ledger failure.
    #[error(transparent)]
    Lifecycle(LifecycleError),

    /// Payment provider failure.
    #[error(transparent)]
    Provider(#[from] PaymentProviderError),
}

impl From<LifecycleError> for CheckoutError {
    fn from(error: LifecycleError) -> Self {
        match error {
            LifecycleError::InvalidQuantity(quantity) => Self::InvalidQuantity(quantity),
            other => Self::Lifecycle(other),
        }
    }
}

impl CheckoutError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::InvalidQuantity(_) => "INVALID_QUANTITY",
            Self::InvalidEmail => "INVALID_EMAIL",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::Lifecycle(_) | Self::Provider(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to a buyer. Internal failures stay generic.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::InsufficientStock { available, .. } => {
                format!("Not enough tickets available ({available} left)")
            }
            Self::InvalidQuantity(_) => "Quantity must be a positive number of tickets".to_string(),
            Self::InvalidEmail => "A valid email address is required".to_string(),
            Self::OrderNotFound(_) => "Order not found".to_string(),
            Self::Lifecycle(_) | Self::Provider(_) => {
                "Could not process the order, please try again".to_string()
            }
        }
    }

    /// Whether the same request may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientStock { .. } | Self::Lifecycle(_) | Self::Provider(_)
        )
    }
}

/// A reserved order with an open provider checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatedOrder {
    /// The new order
    pub order_id: OrderId,
    /// Tickets held for the buyer
    pub ticket_numbers: Vec<TicketNumber>,
    /// Where to send the buyer
    pub checkout_url: String,
    /// Amount to pay
    pub total: Money,
    /// Hold deadline
    pub expires_at: DateTime<Utc>,
}

/// What a payment event did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentEventOutcome {
    /// Nothing to act on. The event is still acknowledged.
    Ignored,
    /// Payment approved.
    Approved {
        /// Order paid
        order_id: OrderId,
        /// Whether this event moved the order to `PAID`
        changed: bool,
    },
    /// Payment failed; the order is closed.
    Failed {
        /// Order closed
        order_id: OrderId,
        /// Why
        reason: ReleaseReason,
        /// Whether this event closed the order
        changed: bool,
    },
    /// Payment still in flight; the hold is kept.
    Pending {
        /// Order held
        order_id: OrderId,
        /// Whether the reference was recorded
        changed: bool,
    },
}

/// Checkout boundary.
#[derive(Clone)]
pub struct Checkout {
    lifecycle: OrderLifecycle,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn PurchaseNotifier>,
    clock: Arc<dyn Clock>,
    pricing: PriceTiers,
    hold: chrono::Duration,
    retry: RetryPolicy,
}

impl Checkout {
    /// Create a checkout. Holds last `hold` from order creation.
    #[must_use]
    pub fn new(
        lifecycle: OrderLifecycle,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn PurchaseNotifier>,
        clock: Arc<dyn Clock>,
        pricing: PriceTiers,
        hold: chrono::Duration,
    ) -> Self {
        Self {
            lifecycle,
            provider,
            notifier,
            clock,
            pricing,
            hold,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for provider lookups made while handling payment events.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reserve `quantity` tickets for `email` and open a provider checkout.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::InvalidQuantity`] / [`CheckoutError::InvalidEmail`] for bad input
    /// - [`CheckoutError::InsufficientStock`] when the pool is short; nothing is persisted
    /// - [`CheckoutError::Provider`] when the checkout could not be opened; the
    ///   order has been cancelled and its tickets released
    /// - [`CheckoutError::Lifecycle`] if the ledger fails
    pub async fn create_order(
        &self,
        quantity: u32,
        email: &str,
    ) -> Result<CreatedOrder, CheckoutError> {
        let email = email.trim();
        if !is_plausible_email(email) {
            return Err(CheckoutError::InvalidEmail);
        }
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity(quantity));
        }
        let total = self.pricing.total_for(quantity).map_err(|e| {
            tracing::debug!(quantity = quantity, error = %e, "Quantity could not be priced");
            CheckoutError::InvalidQuantity(quantity)
        })?;
        let expires_at = self.clock.now() + self.hold;

        let (order_id, ticket_numbers) = match self
            .lifecycle
            .create_preference_flow(quantity, email, expires_at, total)
            .await?
        {
            CreateOutcome::Reserved { order_id, numbers } => (order_id, numbers),
            CreateOutcome::InsufficientStock {
                requested,
                available,
            } => {
                return Err(CheckoutError::InsufficientStock {
                    requested,
                    available,
                });
            }
        };

        let request = PreferenceRequest {
            order_id,
            quantity,
            total,
            expires_at,
        };
        let preference = match self.provider.create_preference(request).await {
            Ok(preference) => preference,
            Err(e) => {
                tracing::warn!(
                    order_id = %order_id,
                    error = %e,
                    "Checkout preference could not be created"
                );
                if let Err(compensation) = self.on_preference_creation_failed(order_id).await {
                    tracing::error!(
                        order_id = %order_id,
                        error = %compensation,
                        "Compensation failed, hold will lapse to reconciliation"
                    );
                }
                return Err(CheckoutError::Provider(e));
            }
        };

        tracing::info!(
            order_id = %order_id,
            quantity = quantity,
            total = %total,
            "Checkout opened"
        );
        Ok(CreatedOrder {
            order_id,
            ticket_numbers,
            checkout_url: preference.checkout_url,
            total,
            expires_at,
        })
    }

    /// Cancel a `PENDING` order whose checkout could not be opened.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::Lifecycle`] if the ledger fails.
    pub async fn on_preference_creation_failed(
        &self,
        order_id: OrderId,
    ) -> Result<TransitionOutcome, CheckoutError> {
        Ok(self.lifecycle.on_external_preparation_failed(order_id).await?)
    }

    /// Handle a provider notification about `payment_id`.
    ///
    /// The provider is asked for the payment itself; the notification body
    /// is never trusted for status. Unknown payments, payments without an
    /// order reference and payments for unknown orders are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::Provider`] if the payment cannot be fetched
    /// and [`CheckoutError::Lifecycle`] if the transition fails. Either way
    /// the provider should redeliver.
    pub async fn report_payment_event(
        &self,
        payment_id: &str,
    ) -> Result<PaymentEventOutcome, CheckoutError> {
        let payment = retry_transient(&self.retry, "get_payment", || {
            self.provider.get_payment(payment_id)
        })
        .await?;

        let Some(payment) = payment else {
            tracing::warn!(payment_ref = payment_id, "Payment event for unknown payment");
            return Ok(PaymentEventOutcome::Ignored);
        };
        let Some(order_id) = payment
            .external_order_ref
            .as_deref()
            .and_then(|r| r.parse::<OrderId>().ok())
        else {
            tracing::warn!(
                payment_ref = %payment.id,
                external_reference = ?payment.external_order_ref,
                "Payment has no usable order reference"
            );
            return Ok(PaymentEventOutcome::Ignored);
        };
        if self.lifecycle.ledger().get(order_id).await.map_err(LifecycleError::from)?.is_none() {
            tracing::warn!(
                order_id = %order_id,
                payment_ref = %payment.id,
                "Payment references an unknown order"
            );
            return Ok(PaymentEventOutcome::Ignored);
        }

        match &payment.status {
            PaymentStatus::Approved => {
                let outcome = self
                    .lifecycle
                    .handle_payment_approved(order_id, &payment.id, payment.amount)
                    .await?;
                if outcome.changed {
                    if let Some(details) = &outcome.order {
                        notify_purchase(self.notifier.as_ref(), details).await;
                    }
                }
                Ok(PaymentEventOutcome::Approved {
                    order_id,
                    changed: outcome.changed,
                })
            }
            status if status.is_in_flight() => {
                let changed = self
                    .lifecycle
                    .add_pending_payment(order_id, &payment.id)
                    .await?;
                Ok(PaymentEventOutcome::Pending { order_id, changed })
            }
            status => {
                let Some(reason) = status.failure_reason() else {
                    tracing::info!(
                        order_id = %order_id,
                        payment_ref = %payment.id,
                        status = %status,
                        "Payment status not actionable"
                    );
                    return Ok(PaymentEventOutcome::Ignored);
                };
                let outcome = self
                    .lifecycle
                    .handle_payment_failed_or_expired(order_id, reason)
                    .await?;
                Ok(PaymentEventOutcome::Failed {
                    order_id,
                    reason,
                    changed: outcome.changed > 0,
                })
            }
        }
    }

    /// Read an order with its tickets.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::OrderNotFound`] for an unknown id.
    pub async fn order(&self, order_id: OrderId) -> Result<OrderDetails, CheckoutError> {
        self.lifecycle
            .ledger()
            .get(order_id)
            .await
            .map_err(LifecycleError::from)?
            .ok_or(CheckoutError::OrderNotFound(order_id))
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_check_is_basic() {
        assert!(is_plausible_email("buyer@example.com"));
        assert!(!is_plausible_email(""));
        assert!(!is_plausible_email("buyer"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("a b@example.com"));
    }

    #[test]
    fn internal_errors_stay_generic() {
        let err = CheckoutError::Provider(PaymentProviderError::Unavailable(
            "connect timeout to 10.0.0.7".to_string(),
        ));
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(!err.public_message().contains("10.0.0.7"));
        assert!(err.is_retryable());
    }

    #[test]
    fn lifecycle_quantity_error_keeps_its_code() {
        let err = CheckoutError::from(LifecycleError::InvalidQuantity(0));
        assert_eq!(err.code(), "INVALID_QUANTITY");
    }
}
