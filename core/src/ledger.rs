//! Ledger trait: the durable ticket pool, reservation ledger and order store.
//!
//! A ledger owns the three tables the engine needs and exposes each mutation
//! the lifecycle depends on as a single atomic unit. Correctness lives in the
//! storage layer: the exclusivity of open reservations, the claim-or-skip
//! selection of tickets and orders, and the `... WHERE status = 'PENDING'`
//! guard on every transition.
//!
//! # Implementations
//!
//! - `PostgresLedger` (in `raffle-postgres`): production implementation
//! - `InMemoryLedger` (in `raffle-testing`): fast, deterministic testing
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so the ledger can be shared as
//! `Arc<dyn Ledger>` between request handlers and the reconciliation loop.

use crate::money::Money;
use crate::order::{NewOrder, Order, OrderDetails, OrderId, OrderStatus, ReleaseReason};
use crate::ticket::TicketNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`Ledger`] methods.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Errors that can occur during ledger operations.
///
/// Every variant means the atomic unit was rolled back.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Concurrent claimants kept colliding on the same tickets.
    #[error("Reservation contention persisted after {attempts} attempts")]
    Contention {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// A stored row could not be decoded into a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Result of the create-and-reserve unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Order persisted as `PENDING` holding exactly these tickets.
    Reserved(Vec<TicketNumber>),
    /// Not enough tickets could be claimed; nothing was persisted.
    Insufficient {
        /// Tickets requested
        requested: u32,
        /// Tickets that could be claimed in this attempt
        claimable: u32,
    },
}

/// Result of a guarded transition that also releases tickets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// 1 if this call moved the order out of `PENDING`, else 0
    pub changed: u64,
    /// Reservation records released by this call
    pub released: u64,
}

/// Current holder of a ticket, as seen through its open reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketHolder {
    /// Holding order
    pub order_id: OrderId,
    /// Status of the holding order
    pub status: OrderStatus,
    /// Buyer email
    pub email: String,
    /// Order amount
    pub amount: Money,
    /// When the order was created
    pub created_at: DateTime<Utc>,
    /// Hold deadline
    pub expires_at: DateTime<Utc>,
}

/// A catalog ticket and its open reservation, if any.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketHolding {
    /// The ticket
    pub ticket: TicketNumber,
    /// Owner of the open reservation; `None` means available
    pub holder: Option<TicketHolder>,
}

/// Pool-wide counters for dashboards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Catalog size
    pub total_tickets: u64,
    /// Tickets with no open reservation
    pub available: u64,
    /// Tickets with an open reservation on a non-`PAID` order
    pub held: u64,
    /// Tickets bound to `PAID` orders
    pub sold: u64,
    /// Orders per status
    pub orders: BTreeMap<OrderStatus, u64>,
    /// Sum of `PAID` order amounts
    pub revenue: Money,
}

/// Durable store for tickets, reservations and orders.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; many request handlers and the
/// reconciliation loop call into the same ledger concurrently, possibly from
/// several processes.
pub trait Ledger: Send + Sync {
    /// Populate the catalog with `total` tickets unless it is already populated.
    ///
    /// Returns the number of tickets inserted (0 when already seeded).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the write fails.
    fn seed(&self, total: u32) -> LedgerFuture<'_, u64>;

    /// Count tickets without an open reservation.
    ///
    /// Diagnostic only: allocation re-checks availability under lock.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    fn availability_count(&self) -> LedgerFuture<'_, u64>;

    /// Insert a `PENDING` order and reserve `order.quantity` random tickets
    /// for it, as one atomic unit.
    ///
    /// When fewer tickets can be claimed the whole unit is rolled back and
    /// [`ReserveOutcome::Insufficient`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the unit fails for any other reason; nothing
    /// is persisted in that case either.
    fn create_order_with_reservation(&self, order: NewOrder) -> LedgerFuture<'_, ReserveOutcome>;

    /// Move the order to `PAID` if it is still `PENDING`, recording the
    /// payment reference and paid amount. Tickets stay bound.
    ///
    /// Returns the number of orders changed (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the update fails.
    fn mark_paid_if_pending(
        &self,
        id: OrderId,
        payment_ref: String,
        amount: Money,
    ) -> LedgerFuture<'_, u64>;

    /// Move the order to the terminal status matching `reason` if it is still
    /// `PENDING`, and on success release its open reservations with that
    /// reason, as one atomic unit.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the unit fails.
    fn finish_and_release(
        &self,
        id: OrderId,
        reason: ReleaseReason,
    ) -> LedgerFuture<'_, TransitionOutcome>;

    /// Record a provider reference on a still-`PENDING` order without
    /// changing its status.
    ///
    /// Returns the number of orders changed (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the update fails.
    fn attach_pending_payment_ref(&self, id: OrderId, payment_ref: String)
    -> LedgerFuture<'_, u64>;

    /// Claim up to `limit` `PENDING` orders whose deadline is before `now`.
    ///
    /// Rows currently claimed by another caller (a live lock or an unexpired
    /// claim) are skipped, never waited on. Claimed rows stay claimed until
    /// `claim_until` or until they leave `PENDING`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the claim fails.
    fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        claim_until: DateTime<Utc>,
    ) -> LedgerFuture<'_, Vec<Order>>;

    /// Read an order with its reservation history.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the query fails.
    fn get(&self, id: OrderId) -> LedgerFuture<'_, Option<OrderDetails>>;

    /// Look up catalog tickets and their open reservations.
    ///
    /// Numbers not in the catalog are omitted from the result.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the query fails.
    fn ticket_holdings(&self, numbers: Vec<TicketNumber>) -> LedgerFuture<'_, Vec<TicketHolding>>;

    /// Orders newest first, with their reservations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the query fails.
    fn list_orders(&self, limit: usize, offset: usize) -> LedgerFuture<'_, Vec<OrderDetails>>;

    /// Pool-wide counters.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the query fails.
    fn stats(&self) -> LedgerFuture<'_, PoolStats>;
}
