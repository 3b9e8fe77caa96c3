//! [`PostgresLedger`]: the `Ledger` implementation composing the pool,
//! allocator and order store into transactions.

use crate::{allocator, database_error, is_unique_violation, orders, pool};
use chrono::{DateTime, Utc};
use raffle_core::ledger::{
    Ledger, LedgerError, LedgerFuture, PoolStats, ReserveOutcome, TicketHolding,
    TransitionOutcome,
};
use raffle_core::{Money, NewOrder, Order, OrderDetails, OrderId, ReleaseReason, TicketNumber};
use sqlx::PgPool;

/// Attempts at the create-and-reserve unit before reporting contention.
pub const MAX_RESERVE_ATTEMPTS: u32 = 3;

enum AttemptError {
    /// Another claimant committed an open reservation for one of our tickets.
    Collision,
    Ledger(LedgerError),
}

/// `PostgreSQL`-backed ledger.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Connect to `database_url` with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPool::connect(database_url).await.map_err(database_error)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if migrations fail.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn try_create(&self, order: &NewOrder) -> Result<ReserveOutcome, AttemptError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AttemptError::Ledger(database_error(e)))?;

        orders::insert_pending(&mut tx, order)
            .await
            .map_err(|e| AttemptError::Ledger(database_error(e)))?;

        let reservation = match allocator::reserve(&mut tx, order.id, order.quantity).await {
            Ok(reservation) => reservation,
            Err(e) if is_unique_violation(&e) => return Err(AttemptError::Collision),
            Err(e) => return Err(AttemptError::Ledger(database_error(e))),
        };

        if !reservation.satisfied {
            // Discards the order row and any partial claim.
            let _ = tx.rollback().await;
            return Ok(ReserveOutcome::Insufficient {
                requested: order.quantity,
                claimable: u32::try_from(reservation.numbers.len()).unwrap_or(u32::MAX),
            });
        }

        match tx.commit().await {
            Ok(()) => Ok(ReserveOutcome::Reserved(reservation.numbers)),
            Err(e) if is_unique_violation(&e) => Err(AttemptError::Collision),
            Err(e) => Err(AttemptError::Ledger(database_error(e))),
        }
    }
}

impl Ledger for PostgresLedger {
    fn seed(&self, total: u32) -> LedgerFuture<'_, u64> {
        Box::pin(async move {
            let inserted = pool::seed(&self.pool, total).await?;
            if inserted > 0 {
                tracing::info!(tickets = inserted, "Ticket catalog seeded");
            } else {
                tracing::debug!("Ticket catalog already seeded");
            }
            Ok(inserted)
        })
    }

    fn availability_count(&self) -> LedgerFuture<'_, u64> {
        Box::pin(async move { pool::availability_count(&self.pool).await })
    }

    fn create_order_with_reservation(&self, order: NewOrder) -> LedgerFuture<'_, ReserveOutcome> {
        Box::pin(async move {
            for attempt in 1..=MAX_RESERVE_ATTEMPTS {
                match self.try_create(&order).await {
                    Ok(outcome) => return Ok(outcome),
                    Err(AttemptError::Collision) => {
                        tracing::debug!(
                            order_id = %order.id,
                            attempt = attempt,
                            "Reservation collided with a concurrent claim, retrying"
                        );
                        metrics::counter!("raffle.reserve.collisions").increment(1);
                    }
                    Err(AttemptError::Ledger(e)) => return Err(e),
                }
            }

            tracing::warn!(
                order_id = %order.id,
                attempts = MAX_RESERVE_ATTEMPTS,
                "Reservation contention persisted"
            );
            Err(LedgerError::Contention {
                attempts: MAX_RESERVE_ATTEMPTS,
            })
        })
    }

    fn mark_paid_if_pending(
        &self,
        id: OrderId,
        payment_ref: String,
        amount: Money,
    ) -> LedgerFuture<'_, u64> {
        Box::pin(async move { orders::mark_paid_if_pending(&self.pool, id, &payment_ref, amount).await })
    }

    fn finish_and_release(
        &self,
        id: OrderId,
        reason: ReleaseReason,
    ) -> LedgerFuture<'_, TransitionOutcome> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(database_error)?;

            let changed = orders::mark_status_if_pending(&mut *tx, id, reason).await?;
            let released = if changed > 0 {
                allocator::release(&mut tx, id, reason)
                    .await
                    .map_err(database_error)?
            } else {
                0
            };

            tx.commit().await.map_err(database_error)?;
            Ok(TransitionOutcome { changed, released })
        })
    }

    fn attach_pending_payment_ref(
        &self,
        id: OrderId,
        payment_ref: String,
    ) -> LedgerFuture<'_, u64> {
        Box::pin(
            async move { orders::attach_pending_payment_ref(&self.pool, id, &payment_ref).await },
        )
    }

    fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        claim_until: DateTime<Utc>,
    ) -> LedgerFuture<'_, Vec<Order>> {
        Box::pin(async move {
            orders::claim_expired_pending(&self.pool, now, limit, claim_until).await
        })
    }

    fn get(&self, id: OrderId) -> LedgerFuture<'_, Option<OrderDetails>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(database_error)?;
            orders::get(&mut conn, id).await
        })
    }

    fn ticket_holdings(&self, numbers: Vec<TicketNumber>) -> LedgerFuture<'_, Vec<TicketHolding>> {
        Box::pin(async move { orders::ticket_holdings(&self.pool, numbers).await })
    }

    fn list_orders(&self, limit: usize, offset: usize) -> LedgerFuture<'_, Vec<OrderDetails>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(database_error)?;
            orders::list(&mut conn, limit, offset).await
        })
    }

    fn stats(&self) -> LedgerFuture<'_, PoolStats> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(database_error)?;
            orders::stats(&mut conn).await
        })
    }
}
