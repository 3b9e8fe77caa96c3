//! # Mercado Pago Client
//!
//! [`PaymentProvider`](raffle_core::PaymentProvider) implementation over the
//! Mercado Pago REST API, plus webhook notification parsing.
//!
//! ## Example
//!
//! ```no_run
//! use raffle_mercadopago::{MercadoPagoClient, MercadoPagoConfig};
//! use raffle_core::PaymentProvider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = MercadoPagoConfig::new(std::env::var("MP_ACCESS_TOKEN")?);
//!     config.notification_url = Some("https://raffle.example/webhook".to_string());
//!     let client = MercadoPagoClient::new(config)?;
//!
//!     if let Some(payment) = client.get_payment("1319876").await? {
//!         println!("{} is {}", payment.id, payment.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error mapping
//!
//! Network failures, 429 and 5xx answers surface as the transient
//! `PaymentProviderError::Unavailable`; any other non-success answer is a
//! permanent `Rejected`. A 404 on a payment lookup is "no such payment".

pub mod client;
pub mod error;
pub mod types;
pub mod webhook;

// Re-export main types for convenience
pub use client::{DEFAULT_API_URL, MercadoPagoClient, MercadoPagoConfig};
pub use error::MercadoPagoError;
pub use webhook::WebhookNotification;
