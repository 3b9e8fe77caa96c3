//! Configuration management for the raffle services.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Required values that are missing and values that do not parse are
//! reported as [`ConfigError`].

use raffle_core::{PriceTiers, TicketNumber};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default price table: `threshold:unit_price` pairs.
pub const DEFAULT_PRICE_TIERS: &str = "1:2000.00,5:1800.00,10:1500.00";

/// Configuration error
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set to something unusable.
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` configuration
    pub postgres: PostgresConfig,
    /// Ticket pool and pricing
    pub raffle: RaffleConfig,
    /// Reconciliation loop
    pub reconcile: ReconcileConfig,
    /// Mercado Pago
    pub mercadopago: MercadoPagoSettings,
    /// Process-level settings
    pub server: ServerConfig,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Ticket pool and pricing
#[derive(Debug, Clone)]
pub struct RaffleConfig {
    /// Catalog size
    pub total_tickets: u32,
    /// How long a reservation is held while the buyer pays
    pub hold_minutes: u32,
    /// Unit price per quantity threshold
    pub price_tiers: PriceTiers,
}

impl RaffleConfig {
    /// Hold duration
    #[must_use]
    pub fn hold(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.hold_minutes))
    }

    /// Width of a ticket identifier
    #[must_use]
    pub fn ticket_width(&self) -> usize {
        TicketNumber::width_for(self.total_tickets)
    }
}

/// Reconciliation loop
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Seconds between ticks
    pub interval_secs: u64,
    /// Orders claimed per tick
    pub batch_size: usize,
    /// Seconds a claim keeps other workers away from an order
    pub claim_ttl_secs: u64,
}

impl ReconcileConfig {
    /// Tick interval
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Claim lease
    #[must_use]
    pub fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.claim_ttl_secs).unwrap_or(i64::MAX))
    }
}

/// Mercado Pago
#[derive(Clone)]
pub struct MercadoPagoSettings {
    /// Seller access token
    pub access_token: String,
    /// API base URL
    pub api_url: String,
    /// Webhook target
    pub webhook_url: Option<String>,
    /// Redirect after an approved payment
    pub success_url: Option<String>,
    /// Redirect while the payment is pending
    pub pending_url: Option<String>,
    /// Redirect after a failed payment
    pub failure_url: Option<String>,
}

impl fmt::Debug for MercadoPagoSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MercadoPagoSettings")
            .field("access_token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("webhook_url", &self.webhook_url)
            .field("success_url", &self.success_url)
            .field("pending_url", &self.pending_url)
            .field("failure_url", &self.failure_url)
            .finish()
    }
}

/// Process-level settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Prometheus listener
    pub metrics_addr: SocketAddr,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from a fixed set of variables.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let postgres = PostgresConfig {
            url: vars.required("DATABASE_URL")?,
            max_connections: vars.parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            min_connections: vars.parse_or("DATABASE_MIN_CONNECTIONS", 2)?,
            connect_timeout: vars.parse_or("DATABASE_CONNECT_TIMEOUT", 30)?,
        };
        if postgres.min_connections > postgres.max_connections {
            return Err(ConfigError::Invalid {
                key: "DATABASE_MIN_CONNECTIONS",
                reason: format!(
                    "{} exceeds DATABASE_MAX_CONNECTIONS ({})",
                    postgres.min_connections, postgres.max_connections
                ),
            });
        }

        let raffle = RaffleConfig {
            total_tickets: vars.positive("RAFFLE_TOTAL_TICKETS", 10_000)?,
            hold_minutes: vars.positive("RAFFLE_HOLD_MINUTES", 60)?,
            price_tiers: vars
                .get("RAFFLE_PRICE_TIERS")
                .unwrap_or_else(|| DEFAULT_PRICE_TIERS.to_string())
                .parse()
                .map_err(|e: raffle_core::PricingError| ConfigError::Invalid {
                    key: "RAFFLE_PRICE_TIERS",
                    reason: e.to_string(),
                })?,
        };

        let reconcile = ReconcileConfig {
            interval_secs: vars.positive("RECONCILE_INTERVAL_SECS", 5_400)?,
            batch_size: vars.positive("RECONCILE_BATCH_SIZE", 50)?,
            claim_ttl_secs: vars.positive("RECONCILE_CLAIM_TTL_SECS", 300)?,
        };

        let mercadopago = MercadoPagoSettings {
            access_token: vars.required("MP_ACCESS_TOKEN")?,
            api_url: vars
                .get("MP_API_URL")
                .unwrap_or_else(|| raffle_mercadopago::DEFAULT_API_URL.to_string()),
            webhook_url: vars.get("MP_WEBHOOK_URL"),
            success_url: vars.get("MP_SUCCESS_URL"),
            pending_url: vars.get("MP_PENDING_URL"),
            failure_url: vars.get("MP_FAILURE_URL"),
        };

        let server = ServerConfig {
            metrics_addr: vars.parse_or(
                "METRICS_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 9090)),
            )?,
            shutdown_timeout: vars.parse_or("SHUTDOWN_TIMEOUT_SECS", 10)?,
        };

        Ok(Self {
            postgres,
            raffle,
            reconcile,
            mercadopago,
            server,
        })
    }
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    /// Set and non-blank.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: format!("{raw:?}: {e}"),
            }),
        }
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq,
        T::Err: fmt::Display,
    {
        let value = self.parse_or(key, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                key,
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }
}
