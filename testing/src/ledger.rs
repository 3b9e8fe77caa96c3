//! In-memory ledger for fast, deterministic testing.
//!
//! Every operation runs under one mutex, which makes each call trivially
//! atomic. The exclusivity of open reservations is kept by an index from
//! ticket to holding order, mirroring the partial unique index of the
//! `PostgreSQL` schema.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Mutex poisoning only follows a panicking test

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use raffle_core::environment::{Clock, SystemClock};
use raffle_core::ledger::{
    Ledger, LedgerError, LedgerFuture, PoolStats, ReserveOutcome, TicketHolder, TicketHolding,
    TransitionOutcome,
};
use raffle_core::{
    Money, NewOrder, Order, OrderDetails, OrderId, OrderStatus, ReleaseReason,
    ReservationRecord, TicketNumber,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct ReservationRow {
    order_id: OrderId,
    ticket: TicketNumber,
    assigned_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    release_reason: Option<ReleaseReason>,
}

#[derive(Debug, Clone)]
struct OrderRow {
    order: Order,
    claimed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    tickets: BTreeSet<TicketNumber>,
    orders: HashMap<OrderId, OrderRow>,
    reservations: Vec<ReservationRow>,
    open: HashMap<TicketNumber, OrderId>,
}

impl State {
    fn details(&self, row: &OrderRow) -> OrderDetails {
        let mut reservations: Vec<ReservationRecord> = self
            .reservations
            .iter()
            .filter(|r| r.order_id == row.order.id)
            .map(|r| ReservationRecord {
                ticket: r.ticket.clone(),
                assigned_at: r.assigned_at,
                released_at: r.released_at,
                release_reason: r.release_reason,
            })
            .collect();
        reservations.sort_by(|a, b| a.ticket.cmp(&b.ticket));
        OrderDetails {
            order: row.order.clone(),
            reservations,
        }
    }

    fn release(&mut self, order_id: OrderId, reason: ReleaseReason, now: DateTime<Utc>) -> u64 {
        let paid = self
            .orders
            .get(&order_id)
            .is_some_and(|row| row.order.status == OrderStatus::Paid);
        if paid {
            return 0;
        }

        let mut released = 0;
        for row in &mut self.reservations {
            if row.order_id == order_id && row.released_at.is_none() {
                row.released_at = Some(now);
                row.release_reason = Some(reason);
                self.open.remove(&row.ticket);
                released += 1;
            }
        }
        released
    }
}

/// In-memory [`Ledger`].
///
/// # Example
///
/// ```
/// use raffle_testing::InMemoryLedger;
/// use raffle_core::Ledger;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = InMemoryLedger::new();
/// ledger.seed(5).await?;
/// assert_eq!(ledger.availability_count().await?, 5);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<Mutex<bool>>,
}

impl InMemoryLedger {
    /// Create an empty ledger on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty ledger stamping rows with `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            unavailable: Arc::new(Mutex::new(false)),
        }
    }

    /// Make every subsequent call fail with [`LedgerError::Database`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    /// Number of open reservations per ticket, for exclusivity assertions.
    #[must_use]
    pub fn open_reservations_per_ticket(&self) -> HashMap<TicketNumber, usize> {
        let state = self.state.lock().unwrap();
        let mut counts = HashMap::new();
        for row in state.reservations.iter().filter(|r| r.released_at.is_none()) {
            *counts.entry(row.ticket.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Force an order's deadline, e.g. to make it eligible for reconciliation.
    pub fn set_expires_at(&self, id: OrderId, expires_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.orders.get_mut(&id) {
            row.order.expires_at = expires_at;
        }
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if *self.unavailable.lock().unwrap() {
            return Err(LedgerError::Database("in-memory ledger marked unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for InMemoryLedger {
    fn seed(&self, total: u32) -> LedgerFuture<'_, u64> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock().unwrap();
            if !state.tickets.is_empty() {
                return Ok(0);
            }
            let width = TicketNumber::width_for(total);
            state.tickets = (0..total).map(|i| TicketNumber::from_index(i, width)).collect();
            Ok(u64::from(total))
        })
    }

    fn availability_count(&self) -> LedgerFuture<'_, u64> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().unwrap();
            Ok((state.tickets.len() - state.open.len()) as u64)
        })
    }

    fn create_order_with_reservation(&self, order: NewOrder) -> LedgerFuture<'_, ReserveOutcome> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut state = self.state.lock().unwrap();

            let available: Vec<TicketNumber> = state
                .tickets
                .iter()
                .filter(|t| !state.open.contains_key(*t))
                .cloned()
                .collect();

            let requested = order.quantity as usize;
            if available.len() < requested {
                return Ok(ReserveOutcome::Insufficient {
                    requested: order.quantity,
                    claimable: u32::try_from(available.len()).unwrap_or(u32::MAX),
                });
            }

            let mut numbers: Vec<TicketNumber> = available
                .choose_multiple(&mut rand::thread_rng(), requested)
                .cloned()
                .collect();
            numbers.sort();

            state.orders.insert(
                order.id,
                OrderRow {
                    order: Order {
                        id: order.id,
                        status: OrderStatus::Pending,
                        email: order.email,
                        quantity: order.quantity,
                        amount: order.amount,
                        payment_ref: None,
                        created_at: now,
                        expires_at: order.expires_at,
                        updated_at: now,
                    },
                    claimed_until: None,
                },
            );
            for ticket in &numbers {
                state.open.insert(ticket.clone(), order.id);
                state.reservations.push(ReservationRow {
                    order_id: order.id,
                    ticket: ticket.clone(),
                    assigned_at: now,
                    released_at: None,
                    release_reason: None,
                });
            }

            Ok(ReserveOutcome::Reserved(numbers))
        })
    }

    fn mark_paid_if_pending(
        &self,
        id: OrderId,
        payment_ref: String,
        amount: Money,
    ) -> LedgerFuture<'_, u64> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut state = self.state.lock().unwrap();
            match state.orders.get_mut(&id) {
                Some(row) if row.order.status == OrderStatus::Pending => {
                    row.order.status = OrderStatus::Paid;
                    row.order.payment_ref = Some(payment_ref);
                    row.order.amount = amount;
                    row.order.updated_at = now;
                    row.claimed_until = None;
                    Ok(1)
                }
                _ => Ok(0),
            }
        })
    }

    fn finish_and_release(
        &self,
        id: OrderId,
        reason: ReleaseReason,
    ) -> LedgerFuture<'_, TransitionOutcome> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut state = self.state.lock().unwrap();
            let changed = match state.orders.get_mut(&id) {
                Some(row) if row.order.status == OrderStatus::Pending => {
                    row.order.status = reason.terminal_status();
                    row.order.updated_at = now;
                    row.claimed_until = None;
                    true
                }
                _ => false,
            };
            if !changed {
                return Ok(TransitionOutcome::default());
            }
            let released = state.release(id, reason, now);
            Ok(TransitionOutcome {
                changed: 1,
                released,
            })
        })
    }

    fn attach_pending_payment_ref(
        &self,
        id: OrderId,
        payment_ref: String,
    ) -> LedgerFuture<'_, u64> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut state = self.state.lock().unwrap();
            match state.orders.get_mut(&id) {
                Some(row) if row.order.status == OrderStatus::Pending => {
                    row.order.payment_ref = Some(payment_ref);
                    row.order.updated_at = now;
                    Ok(1)
                }
                _ => Ok(0),
            }
        })
    }

    fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        claim_until: DateTime<Utc>,
    ) -> LedgerFuture<'_, Vec<Order>> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock().unwrap();
            let mut due: Vec<&mut OrderRow> = state
                .orders
                .values_mut()
                .filter(|row| {
                    row.order.status == OrderStatus::Pending
                        && row.order.expires_at < now
                        && row.claimed_until.is_none_or(|until| until < now)
                })
                .collect();
            due.sort_by_key(|row| row.order.expires_at);

            Ok(due
                .into_iter()
                .take(limit)
                .map(|row| {
                    row.claimed_until = Some(claim_until);
                    row.order.clone()
                })
                .collect())
        })
    }

    fn get(&self, id: OrderId) -> LedgerFuture<'_, Option<OrderDetails>> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().unwrap();
            Ok(state.orders.get(&id).map(|row| state.details(row)))
        })
    }

    fn ticket_holdings(&self, numbers: Vec<TicketNumber>) -> LedgerFuture<'_, Vec<TicketHolding>> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().unwrap();
            Ok(numbers
                .into_iter()
                .filter(|n| state.tickets.contains(n))
                .map(|ticket| {
                    let holder = state
                        .open
                        .get(&ticket)
                        .and_then(|order_id| state.orders.get(order_id))
                        .map(|row| TicketHolder {
                            order_id: row.order.id,
                            status: row.order.status,
                            email: row.order.email.clone(),
                            amount: row.order.amount,
                            created_at: row.order.created_at,
                            expires_at: row.order.expires_at,
                        });
                    TicketHolding { ticket, holder }
                })
                .collect())
        })
    }

    fn list_orders(&self, limit: usize, offset: usize) -> LedgerFuture<'_, Vec<OrderDetails>> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().unwrap();
            let mut rows: Vec<&OrderRow> = state.orders.values().collect();
            rows.sort_by(|a, b| b.order.created_at.cmp(&a.order.created_at));
            Ok(rows
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|row| state.details(row))
                .collect())
        })
    }

    fn stats(&self) -> LedgerFuture<'_, PoolStats> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().unwrap();

            let mut orders = BTreeMap::new();
            let mut revenue = Money::ZERO;
            for row in state.orders.values() {
                *orders.entry(row.order.status).or_insert(0) += 1;
                if row.order.status == OrderStatus::Paid {
                    revenue = revenue.checked_add(row.order.amount).unwrap_or(revenue);
                }
            }

            let sold = state
                .open
                .values()
                .filter(|id| {
                    state
                        .orders
                        .get(*id)
                        .is_some_and(|row| row.order.status == OrderStatus::Paid)
                })
                .count() as u64;
            let open = state.open.len() as u64;
            let total = state.tickets.len() as u64;

            Ok(PoolStats {
                total_tickets: total,
                available: total - open,
                held: open - sold,
                sold,
                orders,
                revenue,
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_order(quantity: u32) -> NewOrder {
        NewOrder {
            id: OrderId::new(),
            email: "buyer@example.com".to_string(),
            quantity,
            amount: Money::from_units(10),
            expires_at: Utc::now() + Duration::minutes(30),
        }
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.seed(10).await.unwrap(), 10);
        assert_eq!(ledger.seed(10).await.unwrap(), 0);
        assert_eq!(ledger.availability_count().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn insufficient_stock_persists_nothing() {
        let ledger = InMemoryLedger::new();
        ledger.seed(2).await.unwrap();
        let order = new_order(3);
        let id = order.id;

        let outcome = ledger.create_order_with_reservation(order).await.unwrap();

        assert_eq!(
            outcome,
            ReserveOutcome::Insufficient {
                requested: 3,
                claimable: 2
            }
        );
        assert!(ledger.get(id).await.unwrap().is_none());
        assert_eq!(ledger.availability_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unavailable_ledger_fails_every_call() {
        let ledger = InMemoryLedger::new();
        ledger.set_unavailable(true);
        assert!(matches!(ledger.seed(1).await, Err(LedgerError::Database(_))));
        ledger.set_unavailable(false);
        assert_eq!(ledger.seed(1).await.unwrap(), 1);
    }
}
