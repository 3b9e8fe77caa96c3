//! Ticket identifiers.
//!
//! Tickets are fixed-width, zero-padded numeric strings seeded once from the
//! catalog size: a pool of 10,000 tickets is `0000` through `9999`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error type for ticket number parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketNumberError {
    /// Input is empty after trimming.
    #[error("Empty ticket number")]
    Empty,

    /// Input contains non-digit characters or is wider than the catalog allows.
    #[error("Invalid ticket number: {0}")]
    Invalid(String),
}

/// Identifier of one ticket in the catalog.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(String);

impl TicketNumber {
    /// Wrap a trusted identifier (e.g. read back from storage).
    #[must_use]
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Identifier of the `index`-th ticket in a catalog of the given width.
    #[must_use]
    pub fn from_index(index: u32, width: usize) -> Self {
        Self(format!("{index:0width$}"))
    }

    /// Normalize user input: trim, require digits only, left-pad with zeros.
    ///
    /// # Errors
    ///
    /// Returns [`TicketNumberError`] for empty input, non-digits, or input
    /// wider than `width`.
    ///
    /// # Examples
    ///
    /// ```
    /// use raffle_core::ticket::TicketNumber;
    ///
    /// assert_eq!(TicketNumber::parse(" 42 ", 4).unwrap().as_str(), "0042");
    /// assert!(TicketNumber::parse("12a", 4).is_err());
    /// assert!(TicketNumber::parse("12345", 4).is_err());
    /// ```
    pub fn parse(input: &str, width: usize) -> Result<Self, TicketNumberError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TicketNumberError::Empty);
        }
        if trimmed.len() > width || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TicketNumberError::Invalid(trimmed.to_string()));
        }
        Ok(Self(format!("{trimmed:0>width$}")))
    }

    /// Number of digits needed to print every identifier of a `total`-ticket catalog.
    #[must_use]
    pub fn width_for(total: u32) -> usize {
        let mut max = total.saturating_sub(1);
        let mut digits = 1;
        while max >= 10 {
            max /= 10;
            digits += 1;
        }
        digits
    }

    /// Borrow the identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the identifier
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TicketNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn width_matches_catalog_size() {
        assert_eq!(TicketNumber::width_for(10_000), 4);
        assert_eq!(TicketNumber::width_for(10_001), 5);
        assert_eq!(TicketNumber::width_for(5), 1);
        assert_eq!(TicketNumber::width_for(0), 1);
    }

    #[test]
    fn from_index_pads() {
        assert_eq!(TicketNumber::from_index(7, 4).as_str(), "0007");
        assert_eq!(TicketNumber::from_index(9999, 4).as_str(), "9999");
    }

    #[test]
    fn parse_rejects_empty_and_signs() {
        assert_eq!(TicketNumber::parse("   ", 4), Err(TicketNumberError::Empty));
        assert!(TicketNumber::parse("-1", 4).is_err());
        assert_eq!(TicketNumber::parse("0000", 4).unwrap().as_str(), "0000");
    }
}
