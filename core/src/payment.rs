//! Payment provider boundary.
//!
//! The engine never talks HTTP itself. It asks a [`PaymentProvider`] to
//! create a checkout preference for a reserved order and to report the state
//! of payments, and reacts to the [`PaymentStatus`] it gets back.

use crate::money::Money;
use crate::order::{OrderId, ReleaseReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`PaymentProvider`] methods.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, PaymentProviderError>> + Send + 'a>>;

/// Payment provider error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentProviderError {
    /// Network failure, timeout, rate limiting or provider-side 5xx.
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("Payment provider rejected the request (status {status}): {message}")]
    Rejected {
        /// HTTP-like status reported by the provider
        status: u16,
        /// Provider message
        message: String,
    },

    /// The provider answered with something that could not be understood.
    #[error("Invalid payment provider response: {0}")]
    InvalidResponse(String),
}

impl PaymentProviderError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Payment status vocabulary reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Money captured
    Approved,
    /// Waiting for the buyer or the provider
    Pending,
    /// Under review
    InProcess,
    /// Declined
    Rejected,
    /// Cancelled
    Cancelled,
    /// Lapsed at the provider
    Expired,
    /// Any status outside the vocabulary above
    Other(String),
}

impl PaymentStatus {
    /// Parse a provider status string (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Self::Approved,
            "pending" => Self::Pending,
            "in_process" => Self::InProcess,
            "rejected" => Self::Rejected,
            "cancelled" => Self::Cancelled,
            "expired" => Self::Expired,
            other => Self::Other(other.to_string()),
        }
    }

    /// Money may still arrive.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::InProcess)
    }

    /// Release reason for a payment that definitively failed, if it did.
    #[must_use]
    pub const fn failure_reason(&self) -> Option<ReleaseReason> {
        match self {
            Self::Rejected => Some(ReleaseReason::Error),
            Self::Cancelled => Some(ReleaseReason::Cancelled),
            Self::Expired => Some(ReleaseReason::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => f.write_str("approved"),
            Self::Pending => f.write_str("pending"),
            Self::InProcess => f.write_str("in_process"),
            Self::Rejected => f.write_str("rejected"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Expired => f.write_str("expired"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// A payment as reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPayment {
    /// Provider payment identifier
    pub id: String,
    /// Provider status
    pub status: PaymentStatus,
    /// Order reference the payment was created for (`external_reference`)
    pub external_order_ref: Option<String>,
    /// Amount paid
    pub amount: Money,
}

/// Request to open a checkout for a reserved order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreferenceRequest {
    /// Order the checkout pays for
    pub order_id: OrderId,
    /// Tickets reserved
    pub quantity: u32,
    /// Total to charge
    pub total: Money,
    /// Checkout expiry, aligned with the hold deadline
    pub expires_at: DateTime<Utc>,
}

/// Checkout opened at the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    /// URL the buyer is sent to
    pub checkout_url: String,
}

/// Payment provider trait
///
/// Abstraction over checkout providers (Mercado Pago in production).
pub trait PaymentProvider: Send + Sync {
    /// Open a checkout for a reserved order.
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails.
    fn create_preference(&self, request: PreferenceRequest) -> ProviderFuture<'_, Preference>;

    /// Fetch a payment by its provider reference; `None` if the provider has no such payment.
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails.
    fn get_payment(&self, payment_ref: &str) -> ProviderFuture<'_, Option<ProviderPayment>>;

    /// Most recent payment created for an order; `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails.
    fn find_latest_payment_for_order(
        &self,
        order_id: OrderId,
    ) -> ProviderFuture<'_, Option<ProviderPayment>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_vocabulary() {
        assert_eq!(PaymentStatus::parse("APPROVED"), PaymentStatus::Approved);
        assert_eq!(PaymentStatus::parse("in_process"), PaymentStatus::InProcess);
        assert_eq!(
            PaymentStatus::parse("charged_back"),
            PaymentStatus::Other("charged_back".to_string())
        );
    }

    #[test]
    fn failure_reasons() {
        assert_eq!(PaymentStatus::Rejected.failure_reason(), Some(ReleaseReason::Error));
        assert_eq!(
            PaymentStatus::Cancelled.failure_reason(),
            Some(ReleaseReason::Cancelled)
        );
        assert_eq!(PaymentStatus::Expired.failure_reason(), Some(ReleaseReason::Expired));
        assert_eq!(PaymentStatus::Approved.failure_reason(), None);
        assert!(PaymentStatus::Pending.is_in_flight());
        assert!(!PaymentStatus::Approved.is_in_flight());
    }
}
