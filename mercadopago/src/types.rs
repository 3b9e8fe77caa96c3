//! Wire types for the Mercado Pago REST API

use raffle_core::{Money, PaymentStatus, ProviderPayment};
use serde::{Deserialize, Deserializer, Serialize};

/// Mercado Pago sends ids as numbers in some payloads and strings in others.
pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(u64),
        Text(String),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Number(n) => n.to_string(),
        Id::Text(s) => s,
    })
}

/// Body of `POST /checkout/preferences`
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PreferenceBody {
    /// Line items; a purchase is always one item priced at the order total
    pub items: Vec<PreferenceItem>,
    /// Our order id, echoed back on every payment
    pub external_reference: String,
    /// Webhook target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_url: Option<String>,
    /// Where the buyer lands after checkout
    pub back_urls: BackUrls,
    /// Redirect automatically on approval
    pub auto_return: String,
    /// Whether the preference expires
    pub expires: bool,
    /// Preference deadline (RFC 3339, milliseconds)
    pub expiration_date_to: String,
    /// Payment methods restrictions
    pub payment_methods: PaymentMethods,
}

/// One checkout line
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PreferenceItem {
    /// Item id (our order id)
    pub id: String,
    /// Category
    pub category_id: String,
    /// Title shown to the buyer
    pub title: String,
    /// Always 1
    pub quantity: u32,
    /// Order total
    pub unit_price: f64,
}

/// Post-checkout redirects
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct BackUrls {
    /// Approved payment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
    /// Payment still pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<String>,
    /// Payment failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Payment method restrictions
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PaymentMethods {
    /// Excluded payment types
    pub excluded_payment_types: Vec<PaymentTypeRef>,
}

impl Default for PaymentMethods {
    /// Cash vouchers and ATM transfers settle after the hold would lapse.
    fn default() -> Self {
        Self {
            excluded_payment_types: vec![
                PaymentTypeRef {
                    id: "ticket".to_string(),
                },
                PaymentTypeRef {
                    id: "atm".to_string(),
                },
            ],
        }
    }
}

/// Reference to a payment type
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PaymentTypeRef {
    /// Payment type id
    pub id: String,
}

/// Response of `POST /checkout/preferences`
#[derive(Clone, Debug, Deserialize)]
pub struct PreferenceResponse {
    /// Preference id
    pub id: String,
    /// Checkout URL
    pub init_point: String,
}

/// A payment as returned by `GET /v1/payments/{id}` and the search endpoint
#[derive(Clone, Debug, Deserialize)]
pub struct PaymentResource {
    /// Payment id
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    /// Status (`approved`, `pending`, `in_process`, `rejected`, ...)
    #[serde(default)]
    pub status: String,
    /// Our order id
    #[serde(default)]
    pub external_reference: Option<String>,
    /// Amount charged
    #[serde(default)]
    pub transaction_amount: Option<f64>,
}

impl PaymentResource {
    /// Convert to the engine's view of a payment.
    ///
    /// A missing or unreadable amount is reported as zero.
    #[must_use]
    pub fn into_provider_payment(self) -> ProviderPayment {
        let amount = self
            .transaction_amount
            .and_then(|amount| Money::from_decimal(amount).ok())
            .unwrap_or(Money::ZERO);
        ProviderPayment {
            id: self.id,
            status: PaymentStatus::parse(&self.status),
            external_order_ref: self.external_reference.filter(|r| !r.trim().is_empty()),
            amount,
        }
    }
}

/// Response of `GET /v1/payments/search`
#[derive(Clone, Debug, Deserialize)]
pub struct PaymentSearchResponse {
    /// Matching payments
    #[serde(default)]
    pub results: Vec<PaymentResource>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn payment_ids_may_be_numbers() {
        let payment: PaymentResource = serde_json::from_str(
            r#"{"id": 1319876, "status": "approved", "external_reference": "abc", "transaction_amount": 3600.5}"#,
        )
        .unwrap();
        let payment = payment.into_provider_payment();
        assert_eq!(payment.id, "1319876");
        assert_eq!(payment.status, PaymentStatus::Approved);
        assert_eq!(payment.amount, Money::from_cents(360_050));
    }

    #[test]
    fn blank_reference_is_no_reference() {
        let payment: PaymentResource =
            serde_json::from_str(r#"{"id": "77", "status": "pending", "external_reference": ""}"#)
                .unwrap();
        let payment = payment.into_provider_payment();
        assert_eq!(payment.external_order_ref, None);
        assert_eq!(payment.amount, Money::ZERO);
    }
}
