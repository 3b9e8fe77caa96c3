//! # Raffle Runtime
//!
//! Services that drive orders through their lifecycle.
//!
//! ## Core Components
//!
//! - **Order lifecycle** ([`lifecycle`]): the state machine over a [`raffle_core::Ledger`]
//! - **Checkout** ([`checkout`]): order creation, compensation and payment events
//! - **Reconciliation** ([`reconciler`]): periodic, single-flight settlement of lapsed holds
//! - **Ticket lookup** ([`lookup`]): per-ticket status for buyers and operators
//! - **Retry** ([`retry`]) and **metrics** ([`metrics`]): ambient plumbing
//!
//! ## Example
//!
//! ```
//! use raffle_core::environment::SystemClock;
//! use raffle_core::{Money, PriceTiers};
//! use raffle_runtime::{Checkout, ConsoleNotifier, OrderLifecycle};
//! use raffle_testing::{InMemoryLedger, ScriptedPaymentProvider};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let ledger = InMemoryLedger::new();
//! raffle_core::Ledger::seed(&ledger, 100).await.unwrap();
//!
//! let checkout = Checkout::new(
//!     OrderLifecycle::new(Arc::new(ledger)),
//!     Arc::new(ScriptedPaymentProvider::new()),
//!     Arc::new(ConsoleNotifier::new()),
//!     Arc::new(SystemClock),
//!     PriceTiers::flat(Money::from_units(2_000)),
//!     chrono::Duration::minutes(60),
//! );
//!
//! let order = checkout.create_order(2, "buyer@example.com").await.unwrap();
//! assert_eq!(order.ticket_numbers.len(), 2);
//! assert_eq!(order.total, Money::from_units(4_000));
//! # });
//! ```

pub mod checkout;
pub mod lifecycle;
pub mod lookup;
pub mod metrics;
pub mod notify;
pub mod reconciler;
pub mod retry;

pub use checkout::{Checkout, CheckoutError, CreatedOrder, PaymentEventOutcome};
pub use lifecycle::{ApprovalOutcome, CreateOutcome, LifecycleError, OrderLifecycle};
pub use lookup::{LookupError, LookupReport, TicketLookup, TicketState};
pub use notify::ConsoleNotifier;
pub use reconciler::{
    ReconcileStats, Reconciler, ReconcilerConfig, ReconciliationLoop, TickOutcome,
};
pub use retry::{RetryPolicy, retry_transient};
