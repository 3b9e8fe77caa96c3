//! Orders and the reservation ledger.
//!
//! An order is a purchase attempt. It is created `PENDING` together with its
//! reservations and then moves exactly once to a terminal state. Orders and
//! reservation records are never deleted.

use crate::money::Money;
use crate::ticket::TicketNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when a stored or external enum value is unknown.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseOrderError {
    /// Unknown order status
    #[error("Invalid order status: {0}")]
    Status(String),
    /// Unknown release reason
    #[error("Invalid release reason: {0}")]
    ReleaseReason(String),
    /// Malformed order identifier
    #[error("Invalid order id: {0}")]
    Id(String),
}

/// Unique identifier for an order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a new random `OrderId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OrderId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = ParseOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ParseOrderError::Id(s.to_string()))
    }
}

/// Order lifecycle status.
///
/// `Pending` is the only non-terminal state; no transition leaves a terminal one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Tickets held, payment outstanding
    Pending,
    /// Paid; tickets permanently bound
    Paid,
    /// Hold lapsed without payment
    Expired,
    /// Cancelled by the buyer, the provider, or a failed checkout preparation
    Cancelled,
    /// Payment rejected
    Error,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Paid,
        Self::Expired,
        Self::Cancelled,
        Self::Error,
    ];

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, ParseOrderError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "EXPIRED" => Ok(Self::Expired),
            "CANCELLED" => Ok(Self::Cancelled),
            "ERROR" => Ok(Self::Error),
            _ => Err(ParseOrderError::Status(s.to_string())),
        }
    }

    /// Whether the order can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a reservation was released back to the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseReason {
    /// The hold lapsed
    Expired,
    /// The attempt was cancelled
    Cancelled,
    /// The payment failed
    Error,
}

impl ReleaseReason {
    /// Convert reason to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        }
    }

    /// Parse reason from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known reason.
    pub fn parse(s: &str) -> Result<Self, ParseOrderError> {
        match s {
            "EXPIRED" => Ok(Self::Expired),
            "CANCELLED" => Ok(Self::Cancelled),
            "ERROR" => Ok(Self::Error),
            _ => Err(ParseOrderError::ReleaseReason(s.to_string())),
        }
    }

    /// Terminal order status that goes with this release reason.
    #[must_use]
    pub const fn terminal_status(&self) -> OrderStatus {
        match self {
            Self::Expired => OrderStatus::Expired,
            Self::Cancelled => OrderStatus::Cancelled,
            Self::Error => OrderStatus::Error,
        }
    }
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    /// Identifier chosen by the caller
    pub id: OrderId,
    /// Buyer email
    pub email: String,
    /// Number of tickets requested
    pub quantity: u32,
    /// Quoted total at creation time
    pub amount: Money,
    /// Deadline of the hold
    pub expires_at: DateTime<Utc>,
}

/// A purchase attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Current status
    pub status: OrderStatus,
    /// Buyer email
    pub email: String,
    /// Number of tickets requested
    pub quantity: u32,
    /// Quoted total while pending, provider-reported amount once paid
    pub amount: Money,
    /// Payment provider reference, once known
    pub payment_ref: Option<String>,
    /// When the order was created
    pub created_at: DateTime<Utc>,
    /// Deadline of the hold
    pub expires_at: DateTime<Utc>,
    /// Last status or reference change
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether the hold deadline has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// One ticket↔order link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    /// Reserved ticket
    pub ticket: TicketNumber,
    /// When the ticket was claimed
    pub assigned_at: DateTime<Utc>,
    /// When the ticket went back to the pool
    pub released_at: Option<DateTime<Utc>>,
    /// Why it went back
    pub release_reason: Option<ReleaseReason>,
}

impl ReservationRecord {
    /// Whether this link still holds the ticket.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.released_at.is_none()
    }
}

/// An order with its reservation history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    /// The order row
    pub order: Order,
    /// Reservation records, ordered by ticket number
    pub reservations: Vec<ReservationRecord>,
}

impl OrderDetails {
    /// Tickets still bound to this order.
    #[must_use]
    pub fn active_numbers(&self) -> Vec<TicketNumber> {
        self.reservations
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.ticket.clone())
            .collect()
    }

    /// Every ticket ever bound to this order.
    #[must_use]
    pub fn all_numbers(&self) -> Vec<TicketNumber> {
        self.reservations.iter().map(|r| r.ticket.clone()).collect()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in OrderStatus::ALL {
            let parsed = OrderStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(status, parsed);
        }
        assert!(OrderStatus::parse("SOLD").is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Error.is_terminal());
    }

    #[test]
    fn release_reason_maps_to_terminal_status() {
        assert_eq!(ReleaseReason::Expired.terminal_status(), OrderStatus::Expired);
        assert_eq!(ReleaseReason::Cancelled.terminal_status(), OrderStatus::Cancelled);
        assert_eq!(ReleaseReason::Error.terminal_status(), OrderStatus::Error);
        assert!(ReleaseReason::parse("PENDING").is_err());
    }

    #[test]
    fn order_id_parses_uuid_text() {
        let id = OrderId::new();
        let parsed: OrderId = id.to_string().parse().expect("uuid text should parse");
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<OrderId>().is_err());
    }
}
