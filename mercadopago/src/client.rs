//! Mercado Pago API client implementation

use crate::error::MercadoPagoError;
use crate::types::{
    BackUrls, PaymentMethods, PaymentResource, PaymentSearchResponse, PreferenceBody,
    PreferenceItem, PreferenceResponse,
};
use chrono::SecondsFormat;
use raffle_core::payment::ProviderFuture;
use raffle_core::{OrderId, PaymentProvider, Preference, PreferenceRequest, ProviderPayment};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default API base URL
pub const DEFAULT_API_URL: &str = "https://api.mercadopago.com";

/// Client settings
#[derive(Clone, Debug)]
pub struct MercadoPagoConfig {
    /// Seller access token
    pub access_token: String,
    /// API base URL
    pub api_url: String,
    /// Webhook target sent with every preference
    pub notification_url: Option<String>,
    /// Redirect after an approved payment
    pub success_url: Option<String>,
    /// Redirect while the payment is pending
    pub pending_url: Option<String>,
    /// Redirect after a failed payment
    pub failure_url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl MercadoPagoConfig {
    /// Settings with only an access token and defaults elsewhere.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            notification_url: None,
            success_url: None,
            pending_url: None,
            failure_url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Mercado Pago API client
#[derive(Clone)]
pub struct MercadoPagoClient {
    client: Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns [`MercadoPagoError::MissingAccessToken`] for an empty token and
    /// [`MercadoPagoError::RequestFailed`] if the HTTP client cannot be built.
    pub fn new(config: MercadoPagoConfig) -> Result<Self, MercadoPagoError> {
        if config.access_token.trim().is_empty() {
            return Err(MercadoPagoError::MissingAccessToken);
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MercadoPagoError::RequestFailed(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    /// Build the preference body for a reserved order.
    #[must_use]
    pub fn preference_body(&self, request: &PreferenceRequest) -> PreferenceBody {
        let order_id = request.order_id.to_string();
        PreferenceBody {
            items: vec![PreferenceItem {
                id: order_id.clone(),
                category_id: "tickets".to_string(),
                title: format!("Raffle: {} tickets", request.quantity),
                quantity: 1,
                unit_price: request.total.as_decimal(),
            }],
            external_reference: order_id,
            notification_url: self.config.notification_url.clone(),
            back_urls: BackUrls {
                success: self.config.success_url.clone(),
                pending: self.config.pending_url.clone(),
                failure: self.config.failure_url.clone(),
            },
            auto_return: "approved".to_string(),
            expires: true,
            expiration_date_to: request
                .expires_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            payment_methods: PaymentMethods::default(),
        }
    }

    /// Create a checkout preference
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures
    pub async fn create_checkout_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PreferenceResponse, MercadoPagoError> {
        let response = self
            .client
            .post(self.url("/checkout/preferences"))
            .bearer_auth(&self.config.access_token)
            .json(&self.preference_body(request))
            .send()
            .await
            .map_err(|e| MercadoPagoError::RequestFailed(e.to_string()))?;

        let preference: PreferenceResponse = read_json(response).await?;
        tracing::debug!(
            order_id = %request.order_id,
            preference_id = %preference.id,
            "Mercado Pago preference created"
        );
        Ok(preference)
    }

    /// Fetch a payment by id; `None` on 404
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures
    pub async fn payment(&self, payment_id: &str) -> Result<Option<PaymentResource>, MercadoPagoError> {
        // Ids come from webhook bodies and end up in the URL path.
        if payment_id.is_empty()
            || !payment_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Ok(None);
        }
        let response = self
            .client
            .get(self.url(&format!("/v1/payments/{payment_id}")))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| MercadoPagoError::RequestFailed(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(response).await.map(Some)
    }

    /// Most recently created payment carrying `external_reference`
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures
    pub async fn latest_payment_for_reference(
        &self,
        external_reference: &str,
    ) -> Result<Option<PaymentResource>, MercadoPagoError> {
        let response = self
            .client
            .get(self.url("/v1/payments/search"))
            .bearer_auth(&self.config.access_token)
            .query(&[
                ("external_reference", external_reference),
                ("sort", "date_created"),
                ("criteria", "desc"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|e| MercadoPagoError::RequestFailed(e.to_string()))?;

        let search: PaymentSearchResponse = read_json(response).await?;
        Ok(search.results.into_iter().next())
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, MercadoPagoError> {
    match response.status() {
        status if status.is_success() => response
            .json::<T>()
            .await
            .map_err(|e| MercadoPagoError::ResponseParseFailed(e.to_string())),
        StatusCode::TOO_MANY_REQUESTS => Err(MercadoPagoError::RateLimited),
        StatusCode::UNAUTHORIZED => Err(MercadoPagoError::Unauthorized),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(MercadoPagoError::ApiError {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

impl PaymentProvider for MercadoPagoClient {
    fn create_preference(&self, request: PreferenceRequest) -> ProviderFuture<'_, Preference> {
        Box::pin(async move {
            let preference = self.create_checkout_preference(&request).await?;
            Ok(Preference {
                checkout_url: preference.init_point,
            })
        })
    }

    fn get_payment(&self, payment_ref: &str) -> ProviderFuture<'_, Option<ProviderPayment>> {
        let payment_ref = payment_ref.to_string();
        Box::pin(async move {
            let payment = self.payment(&payment_ref).await?;
            Ok(payment.map(PaymentResource::into_provider_payment))
        })
    }

    fn find_latest_payment_for_order(
        &self,
        order_id: OrderId,
    ) -> ProviderFuture<'_, Option<ProviderPayment>> {
        Box::pin(async move {
            let payment = self
                .latest_payment_for_reference(&order_id.to_string())
                .await?;
            Ok(payment.map(PaymentResource::into_provider_payment))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use raffle_core::Money;

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(
            MercadoPagoClient::new(MercadoPagoConfig::new("  ")),
            Err(MercadoPagoError::MissingAccessToken)
        ));
    }

    #[test]
    fn preference_body_prices_the_whole_order_as_one_item() {
        let mut config = MercadoPagoConfig::new("TEST-token");
        config.notification_url = Some("https://raffle.example/webhook".to_string());
        config.success_url = Some("https://raffle.example/success".to_string());
        let client = MercadoPagoClient::new(config).unwrap();
        let order_id = OrderId::new();

        let body = client.preference_body(&PreferenceRequest {
            order_id,
            quantity: 3,
            total: Money::from_units(5_400),
            expires_at: Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap(),
        });

        assert_eq!(body.items.len(), 1);
        assert_eq!(body.items[0].quantity, 1);
        assert!((body.items[0].unit_price - 5_400.0).abs() < f64::EPSILON);
        assert_eq!(body.external_reference, order_id.to_string());
        assert_eq!(body.expiration_date_to, "2025-01-01T01:00:00.000Z");
        assert!(body.expires);
        assert_eq!(body.back_urls.pending, None);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["payment_methods"]["excluded_payment_types"][0]["id"], "ticket");
        assert!(json["back_urls"].get("pending").is_none());
    }
}
