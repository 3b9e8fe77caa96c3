//! Ticket pool: the immutable catalog of ticket numbers.
//!
//! A ticket is available when it has no open reservation; availability is
//! never stored on the ticket row itself.

use crate::{database_error, non_negative};
use raffle_core::{LedgerError, TicketNumber};
use sqlx::{PgExecutor, Row};

/// Insert `total` zero-padded ticket numbers unless the catalog already has rows.
///
/// Returns the number of tickets inserted.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] if the insert fails.
pub async fn seed<'e>(executor: impl PgExecutor<'e>, total: u32) -> Result<u64, LedgerError> {
    let count = i32::try_from(total)
        .map_err(|_| LedgerError::Database(format!("Catalog size {total} is too large")))?;
    let width = i32::try_from(TicketNumber::width_for(total)).unwrap_or(i32::MAX);

    let result = sqlx::query(
        r"
        INSERT INTO tickets (number)
        SELECT LPAD(g::TEXT, $2, '0')
        FROM generate_series(0, $1 - 1) AS g
        WHERE NOT EXISTS (SELECT 1 FROM tickets)
        ON CONFLICT (number) DO NOTHING
        ",
    )
    .bind(count)
    .bind(width)
    .execute(executor)
    .await
    .map_err(database_error)?;

    Ok(result.rows_affected())
}

/// Count tickets without an open reservation.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] if the query fails.
pub async fn availability_count<'e>(executor: impl PgExecutor<'e>) -> Result<u64, LedgerError> {
    let row = sqlx::query(
        r"
        SELECT COUNT(*) AS available
        FROM tickets t
        WHERE NOT EXISTS (
            SELECT 1
            FROM order_tickets ot
            WHERE ot.ticket_number = t.number
              AND ot.released_at IS NULL
        )
        ",
    )
    .fetch_one(executor)
    .await
    .map_err(database_error)?;

    let available: i64 = row.try_get("available").map_err(database_error)?;
    non_negative(available, "available")
}
