//! Webhook notification parsing.
//!
//! Mercado Pago notifies `POST {notification_url}` with a JSON body such as
//! `{"type": "payment", "action": "payment.updated", "data": {"id": "123"}}`.
//! Older integrations put the same information in the query string
//! (`?type=payment&data.id=123` or `?topic=payment&id=123`). The body is
//! never trusted for the payment status: only the id is taken from it.

use crate::error::MercadoPagoError;
use crate::types::id_string;
use serde::Deserialize;

/// Notification topic carrying payment updates
pub const PAYMENT_TOPIC: &str = "payment";

/// Webhook `data` object
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct WebhookData {
    /// Resource id
    #[serde(default, deserialize_with = "optional_id")]
    pub id: Option<String>,
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    id_string(deserializer).map(Some)
}

/// A webhook notification
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct WebhookNotification {
    /// Topic (`payment`, `merchant_order`, ...)
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Action (`payment.created`, `payment.updated`, ...)
    #[serde(default)]
    pub action: Option<String>,
    /// Resource reference
    #[serde(default)]
    pub data: Option<WebhookData>,
}

impl WebhookNotification {
    /// Parse a notification body. An empty body is an empty notification.
    ///
    /// # Errors
    ///
    /// Returns [`MercadoPagoError::ResponseParseFailed`] for a body that is
    /// not a JSON notification.
    pub fn parse(body: &[u8]) -> Result<Self, MercadoPagoError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| MercadoPagoError::ResponseParseFailed(e.to_string()))
    }

    /// Fill gaps from query-string parameters. Body values win.
    #[must_use]
    pub fn with_query<'a>(mut self, query: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut kind = None;
        let mut topic = None;
        let mut data_id = None;
        let mut id = None;
        for (key, value) in query {
            let slot = match key {
                "type" => &mut kind,
                "topic" => &mut topic,
                "data.id" => &mut data_id,
                "id" => &mut id,
                _ => continue,
            };
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value.to_string());
            }
        }

        if self.kind.is_none() {
            self.kind = kind.or(topic);
        }
        let data = self.data.get_or_insert_with(WebhookData::default);
        if data.id.is_none() {
            data.id = data_id.or(id);
        }
        self
    }

    /// Payment id, when this is a payment notification with an id.
    #[must_use]
    pub fn payment_id(&self) -> Option<&str> {
        if self.kind.as_deref() != Some(PAYMENT_TOPIC) {
            return None;
        }
        self.data
            .as_ref()
            .and_then(|data| data.id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn payment_notification_body() {
        let notification = WebhookNotification::parse(
            br#"{"type":"payment","action":"payment.updated","data":{"id":"1319876"}}"#,
        )
        .unwrap();
        assert_eq!(notification.payment_id(), Some("1319876"));
        assert_eq!(notification.action.as_deref(), Some("payment.updated"));
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let notification =
            WebhookNotification::parse(br#"{"type":"payment","data":{"id":42}}"#).unwrap();
        assert_eq!(notification.payment_id(), Some("42"));
    }

    #[test]
    fn other_topics_are_ignored() {
        let notification =
            WebhookNotification::parse(br#"{"type":"merchant_order","data":{"id":"9"}}"#)
                .unwrap();
        assert_eq!(notification.payment_id(), None);
    }

    #[test]
    fn query_string_fills_an_empty_body() {
        let notification = WebhookNotification::parse(b"")
            .unwrap()
            .with_query([("topic", "payment"), ("id", "55")]);
        assert_eq!(notification.payment_id(), Some("55"));

        let notification = WebhookNotification::parse(br#"{"type":"payment","data":{"id":"1"}}"#)
            .unwrap()
            .with_query([("data.id", "2")]);
        assert_eq!(notification.payment_id(), Some("1"));
    }

    #[test]
    fn garbage_body_is_an_error() {
        assert!(WebhookNotification::parse(b"type=payment").is_err());
    }
}
