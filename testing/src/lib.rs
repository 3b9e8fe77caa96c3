//! # Raffle Testing
//!
//! Testing utilities for the raffle engine.
//!
//! This crate provides:
//! - Deterministic clocks implementing the core `Clock` trait
//! - [`InMemoryLedger`]: a ledger with the same guarantees as the `PostgreSQL` one
//! - [`ScriptedPaymentProvider`]: a payment provider driven by the test
//! - [`RecordingNotifier`]: captures purchase confirmations
//!
//! ## Example
//!
//! ```
//! use raffle_testing::{InMemoryLedger, ScriptedPaymentProvider, test_clock};
//! use std::sync::Arc;
//!
//! let clock = Arc::new(test_clock());
//! let ledger = InMemoryLedger::with_clock(clock);
//! let payments = ScriptedPaymentProvider::new();
//! # let _ = (ledger, payments);
//! ```

use chrono::{DateTime, Utc};
use raffle_core::environment::Clock;

pub mod ledger;
pub mod notifier;
pub mod payments;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use raffle_testing::mocks::FixedClock;
    /// use raffle_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when the test says so.
    ///
    /// Clones share the same time, so a test can hold one handle and give
    /// another to the code under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start the clock at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        ///
        /// # Panics
        ///
        /// Panics if a previous holder of the lock panicked.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }
}

// Re-export commonly used items
pub use ledger::InMemoryLedger;
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use notifier::RecordingNotifier;
pub use payments::ScriptedPaymentProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn manual_clock_advances_all_handles() {
        let clock = ManualClock::new(test_clock().now());
        let handle = clock.clone();
        let start = clock.now();

        handle.advance(chrono::Duration::minutes(61));

        assert_eq!(clock.now() - start, chrono::Duration::minutes(61));
    }
}
