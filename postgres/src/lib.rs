//! `PostgreSQL` ledger for the raffle engine.
//!
//! This crate provides the production implementation of the `Ledger` trait
//! from `raffle-core`. It uses sqlx against three tables (see
//! `migrations/`) and supports:
//!
//! - Idempotent seeding of the ticket catalog
//! - Random, skip-locked ticket allocation with a partial unique index
//!   guaranteeing at most one open reservation per ticket
//! - Guarded (`WHERE status = 'PENDING'`) order transitions
//! - Lease-based claiming of expired orders for reconciliation
//!
//! # Example
//!
//! ```no_run
//! use raffle_core::Ledger;
//! use raffle_postgres::PostgresLedger;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = PostgresLedger::new("postgres://localhost/raffle").await?;
//! ledger.migrate().await?;
//! ledger.seed(10_000).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod orders;
pub mod pool;
pub mod store;

pub use allocator::Reservation;
pub use store::PostgresLedger;

use raffle_core::LedgerError;

pub(crate) fn database_error(e: sqlx::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Convert a non-negative database integer, rejecting anything else as corrupt.
pub(crate) fn non_negative(value: i64, column: &str) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::Corrupt(format!("{column} = {value}")))
}
