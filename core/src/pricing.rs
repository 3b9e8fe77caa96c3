//! Bulk-discount pricing.
//!
//! The unit price is a step function of the purchased quantity: the tier with
//! the highest threshold that the quantity meets wins, and the total charged is
//! that unit price times the quantity. Tier values are configuration, not
//! contract.

use crate::money::Money;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while building tiers or pricing a quantity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// No tiers were configured.
    #[error("At least one price tier is required")]
    Empty,

    /// A tier threshold of zero was configured.
    #[error("Price tier thresholds must be positive")]
    ZeroThreshold,

    /// Two tiers share a threshold.
    #[error("Duplicate price tier threshold: {0}")]
    DuplicateThreshold(u32),

    /// Quantity is zero.
    #[error("Quantity must be a positive integer")]
    InvalidQuantity,

    /// Quantity is below the smallest configured threshold.
    #[error("No price tier applies to quantity {0}")]
    NoTier(u32),

    /// Total does not fit in the money representation.
    #[error("Total price overflows for quantity {0}")]
    Overflow(u32),

    /// Tier specification text could not be parsed.
    #[error("Invalid price tier specification: {0}")]
    Parse(String),
}

/// A single pricing step: from `min_quantity` tickets on, each costs `unit_price`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    /// Smallest quantity this tier applies to
    pub min_quantity: u32,
    /// Price of each ticket in this tier
    pub unit_price: Money,
}

impl PriceTier {
    /// Create a tier
    #[must_use]
    pub const fn new(min_quantity: u32, unit_price: Money) -> Self {
        Self {
            min_quantity,
            unit_price,
        }
    }
}

/// Validated, threshold-ordered set of price tiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTiers {
    tiers: Vec<PriceTier>,
}

impl PriceTiers {
    /// Build a tier table. Tiers may be given in any order.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError`] if the table is empty, has a zero threshold, or
    /// repeats a threshold.
    pub fn new(mut tiers: Vec<PriceTier>) -> Result<Self, PricingError> {
        if tiers.is_empty() {
            return Err(PricingError::Empty);
        }
        tiers.sort_by_key(|t| t.min_quantity);
        if tiers[0].min_quantity == 0 {
            return Err(PricingError::ZeroThreshold);
        }
        for pair in tiers.windows(2) {
            if pair[0].min_quantity == pair[1].min_quantity {
                return Err(PricingError::DuplicateThreshold(pair[0].min_quantity));
            }
        }
        Ok(Self { tiers })
    }

    /// A single flat price for every quantity.
    #[must_use]
    pub fn flat(unit_price: Money) -> Self {
        Self {
            tiers: vec![PriceTier::new(1, unit_price)],
        }
    }

    /// Tiers ordered by ascending threshold.
    #[must_use]
    pub fn tiers(&self) -> &[PriceTier] {
        &self.tiers
    }

    /// Unit price for `quantity`: the highest-threshold tier the quantity meets.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::InvalidQuantity`] for zero and
    /// [`PricingError::NoTier`] when the quantity is below every threshold.
    pub fn unit_price_for(&self, quantity: u32) -> Result<Money, PricingError> {
        if quantity == 0 {
            return Err(PricingError::InvalidQuantity);
        }
        self.tiers
            .iter()
            .rev()
            .find(|t| t.min_quantity <= quantity)
            .map(|t| t.unit_price)
            .ok_or(PricingError::NoTier(quantity))
    }

    /// Total charged for `quantity` tickets.
    ///
    /// # Errors
    ///
    /// Same as [`PriceTiers::unit_price_for`], plus [`PricingError::Overflow`].
    pub fn total_for(&self, quantity: u32) -> Result<Money, PricingError> {
        self.unit_price_for(quantity)?
            .checked_mul(u64::from(quantity))
            .ok_or(PricingError::Overflow(quantity))
    }
}

/// Parses `"1:2000,5:1800.00,10:1500"` (threshold:unit-price pairs).
impl FromStr for PriceTiers {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tiers = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (threshold, price) = part
                    .split_once(':')
                    .ok_or_else(|| PricingError::Parse(part.to_string()))?;
                let min_quantity = threshold
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| PricingError::Parse(part.to_string()))?;
                let unit_price = price
                    .parse::<Money>()
                    .map_err(|_| PricingError::Parse(part.to_string()))?;
                Ok(PriceTier::new(min_quantity, unit_price))
            })
            .collect::<Result<Vec<_>, PricingError>>()?;

        Self::new(tiers)
    }
}
