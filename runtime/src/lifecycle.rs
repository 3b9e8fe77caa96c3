//! Order lifecycle service.
//!
//! Drives an order through `PENDING → PAID | EXPIRED | CANCELLED | ERROR`.
//! Each operation maps onto one atomic ledger unit; the `...IfPending` guard
//! inside that unit decides which concurrent caller wins, and every loser
//! observes `changed == 0` and treats the order as already handled.

use crate::metrics::OrderMetrics;
use chrono::{DateTime, Utc};
use raffle_core::{
    Ledger, LedgerError, Money, NewOrder, OrderDetails, OrderId, ReleaseReason, ReserveOutcome,
    TicketNumber, TransitionOutcome,
};
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle error
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Quantity must be a positive integer.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    /// The ledger unit failed and was rolled back.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Result of [`OrderLifecycle::create_preference_flow`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A `PENDING` order now holds these tickets.
    Reserved {
        /// The new order
        order_id: OrderId,
        /// Tickets held, sorted
        numbers: Vec<TicketNumber>,
    },
    /// Not enough tickets; nothing was persisted.
    InsufficientStock {
        /// Tickets requested
        requested: u32,
        /// Tickets that could be claimed
        available: u32,
    },
}

/// Result of [`OrderLifecycle::handle_payment_approved`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalOutcome {
    /// Whether this call moved the order to `PAID`
    pub changed: bool,
    /// The order as stored after the call
    pub order: Option<OrderDetails>,
}

/// Order lifecycle service.
#[derive(Clone)]
pub struct OrderLifecycle {
    ledger: Arc<dyn Ledger>,
}

impl OrderLifecycle {
    /// Create a lifecycle service over `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// The underlying ledger
    #[must_use]
    pub const fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Create a `PENDING` order holding `quantity` random tickets.
    ///
    /// The order and its reservations are written in one unit: when the pool
    /// cannot satisfy the whole quantity nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidQuantity`] for a zero quantity and
    /// [`LifecycleError::Ledger`] if the unit fails.
    pub async fn create_preference_flow(
        &self,
        quantity: u32,
        email: &str,
        expires_at: DateTime<Utc>,
        amount: Money,
    ) -> Result<CreateOutcome, LifecycleError> {
        if quantity == 0 {
            return Err(LifecycleError::InvalidQuantity(quantity));
        }

        let order = NewOrder {
            id: OrderId::new(),
            email: email.to_string(),
            quantity,
            amount,
            expires_at,
        };
        let order_id = order.id;

        match self.ledger.create_order_with_reservation(order).await? {
            ReserveOutcome::Reserved(numbers) => {
                tracing::info!(
                    order_id = %order_id,
                    quantity = quantity,
                    amount = %amount,
                    expires_at = %expires_at,
                    "Order created with tickets reserved"
                );
                OrderMetrics::record_created();
                Ok(CreateOutcome::Reserved { order_id, numbers })
            }
            ReserveOutcome::Insufficient {
                requested,
                claimable,
            } => {
                tracing::info!(
                    requested = requested,
                    available = claimable,
                    "Not enough tickets available"
                );
                OrderMetrics::record_insufficient_stock();
                Ok(CreateOutcome::InsufficientStock {
                    requested,
                    available: claimable,
                })
            }
        }
    }

    /// Compensate a reservation whose checkout could not be prepared:
    /// `PENDING → CANCELLED` and release its tickets.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Ledger`] if the unit fails.
    pub async fn on_external_preparation_failed(
        &self,
        order_id: OrderId,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let outcome = self
            .ledger
            .finish_and_release(order_id, ReleaseReason::Cancelled)
            .await?;

        if outcome.changed > 0 {
            tracing::warn!(
                order_id = %order_id,
                released = outcome.released,
                "Checkout preparation failed, order cancelled"
            );
            OrderMetrics::record_released(outcome.released);
        } else {
            tracing::info!(order_id = %order_id, "Order already left PENDING, nothing to cancel");
        }
        Ok(outcome)
    }

    /// `PENDING → PAID`. Tickets stay bound permanently.
    ///
    /// A duplicate approval is a no-op reported as `changed == false`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Ledger`] if the update or the read-back fails.
    pub async fn handle_payment_approved(
        &self,
        order_id: OrderId,
        payment_ref: &str,
        amount: Money,
    ) -> Result<ApprovalOutcome, LifecycleError> {
        let changed = self
            .ledger
            .mark_paid_if_pending(order_id, payment_ref.to_string(), amount)
            .await?;

        if changed > 0 {
            tracing::info!(
                order_id = %order_id,
                payment_ref = payment_ref,
                amount = %amount,
                "Order paid"
            );
            OrderMetrics::record_paid();
        } else {
            tracing::info!(
                order_id = %order_id,
                payment_ref = payment_ref,
                "Approval ignored, order already left PENDING"
            );
        }

        let order = self.ledger.get(order_id).await?;
        Ok(ApprovalOutcome {
            changed: changed > 0,
            order,
        })
    }

    /// `PENDING → EXPIRED | CANCELLED | ERROR` per `reason`, releasing the
    /// order's tickets with the same reason.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Ledger`] if the unit fails.
    pub async fn handle_payment_failed_or_expired(
        &self,
        order_id: OrderId,
        reason: ReleaseReason,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let outcome = self.ledger.finish_and_release(order_id, reason).await?;

        if outcome.changed > 0 {
            tracing::info!(
                order_id = %order_id,
                reason = %reason,
                released = outcome.released,
                "Order closed and tickets released"
            );
            OrderMetrics::record_released(outcome.released);
        } else {
            tracing::info!(
                order_id = %order_id,
                reason = %reason,
                "Release ignored, order already left PENDING"
            );
        }
        Ok(outcome)
    }

    /// Record an in-flight provider payment on a `PENDING` order. The hold
    /// is kept.
    ///
    /// Returns whether the order was still `PENDING`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Ledger`] if the update fails.
    pub async fn add_pending_payment(
        &self,
        order_id: OrderId,
        payment_ref: &str,
    ) -> Result<bool, LifecycleError> {
        let changed = self
            .ledger
            .attach_pending_payment_ref(order_id, payment_ref.to_string())
            .await?;

        tracing::info!(
            order_id = %order_id,
            payment_ref = payment_ref,
            changed = changed,
            "Pending payment recorded"
        );
        Ok(changed > 0)
    }
}
