//! Order store.
//!
//! Every status change is guarded by `WHERE status = 'PENDING'`, so a
//! transition takes effect at most once no matter how many callers race on
//! it. The number of rows changed is returned to the caller.

use crate::{database_error, non_negative};
use chrono::{DateTime, Utc};
use raffle_core::ledger::{PoolStats, TicketHolder, TicketHolding};
use raffle_core::{
    LedgerError, Money, NewOrder, Order, OrderDetails, OrderId, OrderStatus, ReleaseReason,
    ReservationRecord, TicketNumber,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgExecutor, Row};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, status, email, quantity, amount_cents, payment_ref, \
                             created_at, expires_at, updated_at";

fn cents(amount: Money) -> Result<i64, LedgerError> {
    i64::try_from(amount.cents())
        .map_err(|_| LedgerError::Database(format!("Amount {amount} does not fit in BIGINT")))
}

/// Insert a new `PENDING` order.
///
/// # Errors
///
/// Returns the raw [`sqlx::Error`] if the insert fails.
pub async fn insert_pending(conn: &mut PgConnection, order: &NewOrder) -> Result<(), sqlx::Error> {
    let quantity = i32::try_from(order.quantity).unwrap_or(i32::MAX);
    let amount = i64::try_from(order.amount.cents()).unwrap_or(i64::MAX);

    sqlx::query(
        r"
        INSERT INTO orders (id, status, email, quantity, amount_cents, expires_at)
        VALUES ($1, 'PENDING', $2, $3, $4, $5)
        ",
    )
    .bind(order.id.as_uuid())
    .bind(&order.email)
    .bind(quantity)
    .bind(amount)
    .bind(order.expires_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// `PENDING → PAID`, recording the payment reference and paid amount.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] if the update fails.
pub async fn mark_paid_if_pending<'e>(
    executor: impl PgExecutor<'e>,
    id: OrderId,
    payment_ref: &str,
    amount: Money,
) -> Result<u64, LedgerError> {
    let result = sqlx::query(
        r"
        UPDATE orders
        SET status = 'PAID',
            payment_ref = $2,
            amount_cents = $3,
            claimed_until = NULL,
            updated_at = now()
        WHERE id = $1 AND status = 'PENDING'
        ",
    )
    .bind(id.as_uuid())
    .bind(payment_ref)
    .bind(cents(amount)?)
    .execute(executor)
    .await
    .map_err(database_error)?;

    Ok(result.rows_affected())
}

/// `PENDING → EXPIRED | CANCELLED | ERROR` according to `reason`.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] if the update fails.
pub async fn mark_status_if_pending<'e>(
    executor: impl PgExecutor<'e>,
    id: OrderId,
    reason: ReleaseReason,
) -> Result<u64, LedgerError> {
    let result = sqlx::query(
        r"
        UPDATE orders
        SET status = $2,
            claimed_until = NULL,
            updated_at = now()
        WHERE id = $1 AND status = 'PENDING'
        ",
    )
    .bind(id.as_uuid())
    .bind(reason.terminal_status().as_str())
    .execute(executor)
    .await
    .map_err(database_error)?;

    Ok(result.rows_affected())
}

/// Record a provider reference on a `PENDING` order.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] if the update fails.
pub async fn attach_pending_payment_ref<'e>(
    executor: impl PgExecutor<'e>,
    id: OrderId,
    payment_ref: &str,
) -> Result<u64, LedgerError> {
    let result = sqlx::query(
        r"
        UPDATE orders
        SET payment_ref = $2,
            updated_at = now()
        WHERE id = $1 AND status = 'PENDING'
        ",
    )
    .bind(id.as_uuid())
    .bind(payment_ref)
    .execute(executor)
    .await
    .map_err(database_error)?;

    Ok(result.rows_affected())
}

/// Claim up to `limit` expired `PENDING` orders until `claim_until`.
///
/// Row locks held by concurrent claimants are skipped, and so are orders
/// whose lease has not yet run out.
///
/// # Errors
///
/// Returns [`LedgerError`] if the claim fails or a row cannot be decoded.
pub async fn claim_expired_pending<'e>(
    executor: impl PgExecutor<'e>,
    now: DateTime<Utc>,
    limit: usize,
    claim_until: DateTime<Utc>,
) -> Result<Vec<Order>, LedgerError> {
    #[allow(clippy::cast_possible_wrap)] // Batch sizes are small
    let rows = sqlx::query(&format!(
        r"
        UPDATE orders
        SET claimed_until = $3
        WHERE id IN (
            SELECT id
            FROM orders
            WHERE status = 'PENDING'
              AND expires_at < $1
              AND (claimed_until IS NULL OR claimed_until < $1)
            ORDER BY expires_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {ORDER_COLUMNS}
        "
    ))
    .bind(now)
    .bind(limit as i64)
    .bind(claim_until)
    .fetch_all(executor)
    .await
    .map_err(database_error)?;

    let mut orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>, _>>()?;
    orders.sort_by_key(|o| o.expires_at);
    Ok(orders)
}

/// Read one order with its reservation history.
///
/// # Errors
///
/// Returns [`LedgerError`] if a query fails or a row cannot be decoded.
pub async fn get(conn: &mut PgConnection, id: OrderId) -> Result<Option<OrderDetails>, LedgerError> {
    let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(database_error)?;

    let Some(row) = row else {
        return Ok(None);
    };
    let order = row_to_order(&row)?;
    let mut reservations = reservations_for(&mut *conn, &[*id.as_uuid()]).await?;

    Ok(Some(OrderDetails {
        order,
        reservations: reservations.remove(id.as_uuid()).unwrap_or_default(),
    }))
}

/// Orders newest first, with their reservations.
///
/// # Errors
///
/// Returns [`LedgerError`] if a query fails or a row cannot be decoded.
pub async fn list(
    conn: &mut PgConnection,
    limit: usize,
    offset: usize,
) -> Result<Vec<OrderDetails>, LedgerError> {
    #[allow(clippy::cast_possible_wrap)] // Page sizes are small
    let rows = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id LIMIT $1 OFFSET $2"
    ))
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(&mut *conn)
    .await
    .map_err(database_error)?;

    let orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>, _>>()?;
    let ids: Vec<Uuid> = orders.iter().map(|o| *o.id.as_uuid()).collect();
    let mut reservations = reservations_for(&mut *conn, &ids).await?;

    Ok(orders
        .into_iter()
        .map(|order| {
            let reservations = reservations.remove(order.id.as_uuid()).unwrap_or_default();
            OrderDetails {
                order,
                reservations,
            }
        })
        .collect())
}

/// Catalog tickets among `numbers`, with the order holding each one.
///
/// # Errors
///
/// Returns [`LedgerError`] if the query fails or a row cannot be decoded.
pub async fn ticket_holdings<'e>(
    executor: impl PgExecutor<'e>,
    numbers: Vec<TicketNumber>,
) -> Result<Vec<TicketHolding>, LedgerError> {
    let numbers: Vec<String> = numbers.into_iter().map(TicketNumber::into_inner).collect();

    let rows = sqlx::query(
        r"
        SELECT t.number,
               o.id AS order_id, o.status, o.email, o.amount_cents,
               o.created_at, o.expires_at
        FROM tickets t
        LEFT JOIN order_tickets ot
               ON ot.ticket_number = t.number AND ot.released_at IS NULL
        LEFT JOIN orders o ON o.id = ot.order_id
        WHERE t.number = ANY($1)
        ORDER BY t.number
        ",
    )
    .bind(numbers)
    .fetch_all(executor)
    .await
    .map_err(database_error)?;

    rows.iter().map(row_to_holding).collect()
}

/// Pool-wide counters.
///
/// # Errors
///
/// Returns [`LedgerError`] if a query fails or a row cannot be decoded.
pub async fn stats(conn: &mut PgConnection) -> Result<PoolStats, LedgerError> {
    let row = sqlx::query(
        r"
        SELECT
            (SELECT COUNT(*) FROM tickets) AS total,
            (SELECT COUNT(*) FROM order_tickets WHERE released_at IS NULL) AS open,
            (SELECT COUNT(*)
               FROM order_tickets ot
               JOIN orders o ON o.id = ot.order_id
              WHERE ot.released_at IS NULL AND o.status = 'PAID') AS sold,
            (SELECT COALESCE(SUM(amount_cents), 0)::BIGINT
               FROM orders WHERE status = 'PAID') AS revenue
        ",
    )
    .fetch_one(&mut *conn)
    .await
    .map_err(database_error)?;

    let total = non_negative(row.try_get("total").map_err(database_error)?, "total")?;
    let open = non_negative(row.try_get("open").map_err(database_error)?, "open")?;
    let sold = non_negative(row.try_get("sold").map_err(database_error)?, "sold")?;
    let revenue = non_negative(row.try_get("revenue").map_err(database_error)?, "revenue")?;

    let status_rows = sqlx::query("SELECT status, COUNT(*) AS n FROM orders GROUP BY status")
        .fetch_all(&mut *conn)
        .await
        .map_err(database_error)?;

    let mut orders = BTreeMap::new();
    for row in &status_rows {
        let status: String = row.try_get("status").map_err(database_error)?;
        let status = OrderStatus::parse(&status).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        let n: i64 = row.try_get("n").map_err(database_error)?;
        orders.insert(status, non_negative(n, "count")?);
    }

    Ok(PoolStats {
        total_tickets: total,
        available: total.saturating_sub(open),
        held: open.saturating_sub(sold),
        sold,
        orders,
        revenue: Money::from_cents(revenue),
    })
}

async fn reservations_for(
    conn: &mut PgConnection,
    order_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<ReservationRecord>>, LedgerError> {
    if order_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query(
        r"
        SELECT order_id, ticket_number, assigned_at, released_at, release_reason
        FROM order_tickets
        WHERE order_id = ANY($1)
        ORDER BY order_id, ticket_number
        ",
    )
    .bind(order_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(database_error)?;

    let mut by_order: HashMap<Uuid, Vec<ReservationRecord>> = HashMap::new();
    for row in &rows {
        let order_id: Uuid = row.try_get("order_id").map_err(database_error)?;
        let reason: Option<String> = row.try_get("release_reason").map_err(database_error)?;
        let release_reason = reason
            .as_deref()
            .map(ReleaseReason::parse)
            .transpose()
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;

        by_order.entry(order_id).or_default().push(ReservationRecord {
            ticket: TicketNumber::from(
                row.try_get::<String, _>("ticket_number")
                    .map_err(database_error)?,
            ),
            assigned_at: row.try_get("assigned_at").map_err(database_error)?,
            released_at: row.try_get("released_at").map_err(database_error)?,
            release_reason,
        });
    }
    Ok(by_order)
}

fn row_to_order(row: &PgRow) -> Result<Order, LedgerError> {
    let status: String = row.try_get("status").map_err(database_error)?;
    let status = OrderStatus::parse(&status).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
    let quantity: i32 = row.try_get("quantity").map_err(database_error)?;
    let amount: i64 = row.try_get("amount_cents").map_err(database_error)?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id").map_err(database_error)?),
        status,
        email: row.try_get("email").map_err(database_error)?,
        quantity: u32::try_from(quantity)
            .map_err(|_| LedgerError::Corrupt(format!("quantity = {quantity}")))?,
        amount: Money::from_cents(non_negative(amount, "amount_cents")?),
        payment_ref: row.try_get("payment_ref").map_err(database_error)?,
        created_at: row.try_get("created_at").map_err(database_error)?,
        expires_at: row.try_get("expires_at").map_err(database_error)?,
        updated_at: row.try_get("updated_at").map_err(database_error)?,
    })
}

fn row_to_holding(row: &PgRow) -> Result<TicketHolding, LedgerError> {
    let ticket = TicketNumber::from(row.try_get::<String, _>("number").map_err(database_error)?);
    let order_id: Option<Uuid> = row.try_get("order_id").map_err(database_error)?;

    let holder = match order_id {
        None => None,
        Some(order_id) => {
            let status: String = row.try_get("status").map_err(database_error)?;
            let amount: i64 = row.try_get("amount_cents").map_err(database_error)?;
            Some(TicketHolder {
                order_id: OrderId::from_uuid(order_id),
                status: OrderStatus::parse(&status)
                    .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
                email: row.try_get("email").map_err(database_error)?,
                amount: Money::from_cents(non_negative(amount, "amount_cents")?),
                created_at: row.try_get("created_at").map_err(database_error)?,
                expires_at: row.try_get("expires_at").map_err(database_error)?,
            })
        }
    };

    Ok(TicketHolding { ticket, holder })
}
