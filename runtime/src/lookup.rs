//! Ticket status lookup.
//!
//! Answers "who holds ticket 0042?" for buyers and operators. Inputs are
//! normalized the same way the catalog was seeded (zero-padded to the ticket
//! width), de-duplicated in input order, and then resolved against the
//! ledger in one query.

use raffle_core::ticket::TicketNumberError;
use raffle_core::{Ledger, LedgerError, OrderStatus, TicketHolder, TicketNumber};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Most tickets accepted by one lookup.
pub const MAX_LOOKUP_TICKETS: usize = 500;

/// Lookup error
#[derive(Error, Debug)]
pub enum LookupError {
    /// Some inputs are not ticket numbers.
    #[error("Invalid ticket numbers: {}", .0.join(", "))]
    InvalidTickets(Vec<String>),

    /// Nothing to look up.
    #[error("No ticket numbers given")]
    EmptyTickets,

    /// Too many distinct tickets in one request.
    #[error("Too many tickets: {count} (max {max})")]
    TooManyTickets {
        /// Distinct tickets requested
        count: usize,
        /// Limit
        max: usize,
    },

    /// The ledger query failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl LookupError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTickets(_) => "INVALID_TICKETS",
            Self::EmptyTickets => "EMPTY_TICKETS",
            Self::TooManyTickets { .. } => "TOO_MANY_TICKETS",
            Self::Ledger(_) => "INTERNAL_ERROR",
        }
    }
}

/// State of one looked-up ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketState {
    /// In the catalog, no open reservation
    Available,
    /// Bound to a paid order
    Paid,
    /// Held by a pending order
    Pending,
    /// Held by an order that already failed or expired; the release is overdue
    ShouldBeReleased,
    /// Not in the catalog
    NotFound,
}

impl TicketState {
    fn of(holder: Option<&TicketHolder>) -> Self {
        match holder.map(|h| h.status) {
            None => Self::Available,
            Some(OrderStatus::Paid) => Self::Paid,
            Some(OrderStatus::Pending) => Self::Pending,
            Some(OrderStatus::Expired | OrderStatus::Cancelled | OrderStatus::Error) => {
                Self::ShouldBeReleased
            }
        }
    }
}

/// Status of one ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TicketStatus {
    /// Normalized ticket number
    pub ticket: TicketNumber,
    /// Whether the ticket is in the catalog
    pub exists: bool,
    /// Derived state
    pub state: TicketState,
    /// Whether the ticket is sold
    pub sold: bool,
    /// Holding order, if any
    pub order: Option<TicketHolder>,
}

/// Totals over one lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LookupSummary {
    /// Tickets looked up
    pub total: usize,
    /// Tickets sold
    pub sold: usize,
    /// Tickets per state
    pub by_state: BTreeMap<TicketState, usize>,
}

/// Result of [`TicketLookup::status`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LookupReport {
    /// One entry per distinct input, in input order
    pub tickets: Vec<TicketStatus>,
    /// Totals
    pub summary: LookupSummary,
}

/// Ticket status lookup over a ledger.
#[derive(Clone)]
pub struct TicketLookup {
    ledger: Arc<dyn Ledger>,
    width: usize,
}

impl TicketLookup {
    /// Create a lookup for a catalog of `total_tickets`.
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, total_tickets: u32) -> Self {
        Self {
            ledger,
            width: TicketNumber::width_for(total_tickets),
        }
    }

    /// Normalize and validate raw inputs.
    ///
    /// Blank inputs are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::InvalidTickets`] listing every malformed input,
    /// [`LookupError::EmptyTickets`] when nothing is left, and
    /// [`LookupError::TooManyTickets`] above [`MAX_LOOKUP_TICKETS`].
    pub fn normalize<S: AsRef<str>>(&self, inputs: &[S]) -> Result<Vec<TicketNumber>, LookupError> {
        let mut seen = HashSet::new();
        let mut numbers = Vec::new();
        let mut invalid = Vec::new();

        for input in inputs {
            match TicketNumber::parse(input.as_ref(), self.width) {
                Ok(number) => {
                    if seen.insert(number.clone()) {
                        numbers.push(number);
                    }
                }
                Err(TicketNumberError::Empty) => {}
                Err(TicketNumberError::Invalid(raw)) => invalid.push(raw),
            }
        }

        if !invalid.is_empty() {
            return Err(LookupError::InvalidTickets(invalid));
        }
        if numbers.is_empty() {
            return Err(LookupError::EmptyTickets);
        }
        if numbers.len() > MAX_LOOKUP_TICKETS {
            return Err(LookupError::TooManyTickets {
                count: numbers.len(),
                max: MAX_LOOKUP_TICKETS,
            });
        }
        Ok(numbers)
    }

    /// Look up the state of each ticket.
    ///
    /// # Errors
    ///
    /// Returns a validation [`LookupError`] for bad input and
    /// [`LookupError::Ledger`] if the query fails.
    pub async fn status<S: AsRef<str>>(&self, inputs: &[S]) -> Result<LookupReport, LookupError> {
        let numbers = self.normalize(inputs)?;
        let holdings: HashMap<TicketNumber, Option<TicketHolder>> = self
            .ledger
            .ticket_holdings(numbers.clone())
            .await?
            .into_iter()
            .map(|h| (h.ticket, h.holder))
            .collect();

        let mut summary = LookupSummary {
            total: numbers.len(),
            ..LookupSummary::default()
        };
        let tickets: Vec<TicketStatus> = numbers
            .into_iter()
            .map(|ticket| {
                let status = match holdings.get(&ticket) {
                    None => TicketStatus {
                        ticket,
                        exists: false,
                        state: TicketState::NotFound,
                        sold: false,
                        order: None,
                    },
                    Some(holder) => {
                        let state = TicketState::of(holder.as_ref());
                        TicketStatus {
                            ticket,
                            exists: true,
                            state,
                            sold: state == TicketState::Paid,
                            order: holder.clone(),
                        }
                    }
                };
                *summary.by_state.entry(status.state).or_insert(0) += 1;
                if status.sold {
                    summary.sold += 1;
                }
                status
            })
            .collect();

        tracing::debug!(
            total = summary.total,
            sold = summary.sold,
            "Ticket lookup answered"
        );
        Ok(LookupReport { tickets, summary })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use raffle_testing::InMemoryLedger;

    fn lookup(ledger: &InMemoryLedger) -> TicketLookup {
        TicketLookup::new(Arc::new(ledger.clone()), 10_000)
    }

    #[test]
    fn normalizes_pads_and_dedupes() {
        let lookup = lookup(&InMemoryLedger::new());
        let numbers = lookup.normalize(&[" 7", "0007", "42", ""]).unwrap();
        let numbers: Vec<&str> = numbers.iter().map(TicketNumber::as_str).collect();
        assert_eq!(numbers, vec!["0007", "0042"]);
    }

    #[test]
    fn rejects_bad_input() {
        let lookup = lookup(&InMemoryLedger::new());

        let err = lookup.normalize(&["12a", "5", "12345"]).unwrap_err();
        assert_eq!(err.code(), "INVALID_TICKETS");
        let LookupError::InvalidTickets(invalid) = err else {
            panic!("expected invalid tickets");
        };
        assert_eq!(invalid, vec!["12a".to_string(), "12345".to_string()]);

        let empty: [&str; 2] = ["", "  "];
        assert_eq!(lookup.normalize(&empty).unwrap_err().code(), "EMPTY_TICKETS");

        let many: Vec<String> = (0..=MAX_LOOKUP_TICKETS).map(|i| i.to_string()).collect();
        assert_eq!(lookup.normalize(&many).unwrap_err().code(), "TOO_MANY_TICKETS");
    }

    #[tokio::test]
    async fn reports_catalog_membership() {
        let ledger = InMemoryLedger::new();
        ledger.seed(10_000).await.unwrap();
        let lookup = lookup(&ledger);

        let report = lookup.status(&["1", "9999"]).await.unwrap();

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.by_state.get(&TicketState::Available), Some(&2));
        assert!(report.tickets.iter().all(|t| t.exists && t.order.is_none()));
    }

    #[tokio::test]
    async fn unseeded_tickets_are_not_found() {
        let ledger = InMemoryLedger::new();
        ledger.seed(10).await.unwrap();
        let lookup = lookup(&ledger);

        let report = lookup.status(&["0005", "0500"]).await.unwrap();

        assert_eq!(report.tickets[1].state, TicketState::NotFound);
        assert!(!report.tickets[1].exists);
    }

    proptest::proptest! {
        #[test]
        fn any_catalog_index_normalizes_to_its_seeded_form(index in 0u32..10_000) {
            let lookup = lookup(&InMemoryLedger::new());
            let seeded = TicketNumber::from_index(index, 4);
            let numbers = lookup.normalize(&[index.to_string()]).unwrap();
            proptest::prop_assert_eq!(numbers, vec![seeded]);
        }
    }
}
