//! Reservation allocator.
//!
//! Claims random available tickets for an order and releases them again.
//! Both operations run on a caller-supplied connection so they compose into
//! the caller's transaction.

use raffle_core::{OrderId, ReleaseReason, TicketNumber};
use sqlx::{PgConnection, Row};

/// Tickets claimed by one [`reserve`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// Whether exactly the requested quantity was claimed
    pub satisfied: bool,
    /// Claimed tickets, sorted
    pub numbers: Vec<TicketNumber>,
}

/// Claim up to `quantity` random available tickets for `order_id`.
///
/// Tickets locked by concurrent claimants are skipped rather than waited on,
/// so the call never blocks on another buyer. When fewer than `quantity`
/// tickets could be claimed the result is not `satisfied` and the caller must
/// roll back.
///
/// # Errors
///
/// Returns the raw [`sqlx::Error`] so the caller can tell a collision on the
/// open-reservation index (a unique violation) from other failures.
pub async fn reserve(
    conn: &mut PgConnection,
    order_id: OrderId,
    quantity: u32,
) -> Result<Reservation, sqlx::Error> {
    let rows = sqlx::query(
        r"
        WITH candidates AS (
            SELECT t.number
            FROM tickets t
            WHERE NOT EXISTS (
                SELECT 1
                FROM order_tickets ot
                WHERE ot.ticket_number = t.number
                  AND ot.released_at IS NULL
            )
            ORDER BY random()
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        ),
        inserted AS (
            INSERT INTO order_tickets (order_id, ticket_number)
            SELECT $1, c.number
            FROM candidates c
            RETURNING ticket_number
        )
        SELECT ticket_number
        FROM inserted
        ORDER BY ticket_number
        ",
    )
    .bind(order_id.as_uuid())
    .bind(i64::from(quantity))
    .fetch_all(&mut *conn)
    .await?;

    let numbers = rows
        .iter()
        .map(|row| row.try_get::<String, _>("ticket_number").map(TicketNumber::from))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Reservation {
        satisfied: numbers.len() == quantity as usize,
        numbers,
    })
}

/// Release every open reservation of `order_id` with `reason`.
///
/// Reservations of a `PAID` order are never released. Returns the number of
/// reservation records released.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the update fails.
pub async fn release(
    conn: &mut PgConnection,
    order_id: OrderId,
    reason: ReleaseReason,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r"
        UPDATE order_tickets ot
        SET released_at = now(),
            release_reason = $2
        WHERE ot.order_id = $1
          AND ot.released_at IS NULL
          AND EXISTS (
              SELECT 1
              FROM orders o
              WHERE o.id = ot.order_id
                AND o.status <> 'PAID'
          )
        ",
    )
    .bind(order_id.as_uuid())
    .bind(reason.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
