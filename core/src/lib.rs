//! # Raffle Core
//!
//! Domain types and collaborator traits for the raffle ticket-reservation engine.
//!
//! The engine sells numbered tickets from a finite pool. A purchase attempt
//! reserves tickets under a time-bounded hold while the buyer pays through an
//! external provider, and the hold is later reconciled to a terminal state.
//!
//! ## Core Concepts
//!
//! - **Ticket**: a fixed-width numeric identifier from a pre-seeded catalog
//! - **Reservation**: a ticket↔order link; at most one is open per ticket
//! - **Order**: a purchase attempt moving `PENDING → PAID | EXPIRED | CANCELLED | ERROR`
//! - **Ledger**: the durable store that owns tickets, reservations and orders
//! - **Payment provider** / **notifier**: external collaborators behind traits
//!
//! Nothing in this crate performs I/O. Implementations live in
//! `raffle-postgres` (production), `raffle-mercadopago` (payments) and
//! `raffle-testing` (in-memory doubles).
//!
//! ## Example
//!
//! ```
//! use raffle_core::money::Money;
//! use raffle_core::pricing::{PriceTier, PriceTiers};
//!
//! let tiers = PriceTiers::new(vec![
//!     PriceTier::new(1, Money::from_units(2_000)),
//!     PriceTier::new(10, Money::from_units(1_500)),
//! ])
//! .unwrap();
//!
//! assert_eq!(tiers.total_for(3).unwrap(), Money::from_units(6_000));
//! assert_eq!(tiers.total_for(10).unwrap(), Money::from_units(15_000));
//! ```

pub mod ledger;
pub mod money;
pub mod notify;
pub mod order;
pub mod payment;
pub mod pricing;
pub mod ticket;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use ledger::{
    Ledger, LedgerError, LedgerFuture, PoolStats, ReserveOutcome, TicketHolder, TicketHolding,
    TransitionOutcome,
};
pub use money::Money;
pub use notify::{NotificationError, PurchaseConfirmation, PurchaseNotifier};
pub use order::{
    NewOrder, Order, OrderDetails, OrderId, OrderStatus, ReleaseReason, ReservationRecord,
};
pub use payment::{
    PaymentProvider, PaymentProviderError, PaymentStatus, Preference, PreferenceRequest,
    ProviderPayment,
};
pub use pricing::{PriceTier, PriceTiers, PricingError};
pub use ticket::TicketNumber;

/// Environment module - injected dependencies
///
/// Time is read through a trait so that expiry decisions can be tested
/// deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use raffle_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let now = clock.now();
    /// assert!(now <= chrono::Utc::now());
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
