//! Service wiring.
//!
//! Connects to `PostgreSQL`, prepares the schema and ticket catalog, and
//! builds the services every entry point shares.
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let services = Services::from_config(&config).await?;
//! let created = services.checkout.create_order(3, "buyer@example.com").await?;
//! ```

use crate::config::Config;
use raffle_core::environment::{Clock, SystemClock};
use raffle_core::{Ledger, LedgerError, PaymentProvider, PurchaseNotifier};
use raffle_mercadopago::{MercadoPagoClient, MercadoPagoConfig, MercadoPagoError};
use raffle_postgres::PostgresLedger;
use raffle_runtime::{
    Checkout, ConsoleNotifier, OrderLifecycle, Reconciler, ReconcilerConfig, ReconciliationLoop,
    RetryPolicy, TicketLookup,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Startup failure.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Could not reach the database.
    #[error("Failed to connect to PostgreSQL: {0}")]
    Connect(#[from] sqlx::Error),

    /// Migrations or seeding failed.
    #[error("Failed to prepare the ledger: {0}")]
    Ledger(#[from] LedgerError),

    /// The payment client could not be built.
    #[error("Failed to build the Mercado Pago client: {0}")]
    PaymentProvider(#[from] MercadoPagoError),
}

/// Shared services.
#[derive(Clone)]
pub struct Services {
    /// Durable store
    pub ledger: PostgresLedger,
    /// Order creation and payment events
    pub checkout: Checkout,
    /// Public ticket status
    pub lookup: TicketLookup,
    /// Expired-hold resolution, driven by [`Services::reconciliation_loop`]
    pub reconciler: Arc<Reconciler>,
}

impl Services {
    /// Connect, migrate, seed and wire everything from `config`.
    ///
    /// Seeding is idempotent: an already-seeded catalog is left as is.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if any step fails.
    pub async fn from_config(config: &Config) -> Result<Self, BootstrapError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;
        info!("✓ PostgreSQL connected");

        let ledger = PostgresLedger::from_pool(pool);
        info!("Running migrations...");
        ledger.migrate().await?;
        info!("✓ Migrations complete");

        let inserted = ledger.seed(config.raffle.total_tickets).await?;
        info!(
            total_tickets = config.raffle.total_tickets,
            inserted, "✓ Ticket catalog ready"
        );

        let provider = MercadoPagoClient::new(mercadopago_config(config))?;
        info!(api_url = %config.mercadopago.api_url, "✓ Mercado Pago client ready");

        Ok(Self::wire(
            ledger,
            Arc::new(provider),
            Arc::new(ConsoleNotifier::new()),
            Arc::new(SystemClock),
            config,
        ))
    }

    /// Build the services over the given collaborators.
    #[must_use]
    pub fn wire(
        ledger: PostgresLedger,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn PurchaseNotifier>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let shared: Arc<dyn Ledger> = Arc::new(ledger.clone());
        let lifecycle = OrderLifecycle::new(Arc::clone(&shared));
        let retry = RetryPolicy::default();

        let checkout = Checkout::new(
            lifecycle.clone(),
            Arc::clone(&provider),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            config.raffle.price_tiers.clone(),
            config.raffle.hold(),
        )
        .with_retry(retry.clone());

        let lookup = TicketLookup::new(shared, config.raffle.total_tickets);

        let reconciler = Arc::new(Reconciler::new(
            lifecycle,
            provider,
            notifier,
            clock,
            ReconcilerConfig {
                batch_size: config.reconcile.batch_size,
                claim_ttl: config.reconcile.claim_ttl(),
                retry,
            },
        ));

        Self {
            ledger,
            checkout,
            lookup,
            reconciler,
        }
    }

    /// Periodic driver for the reconciler at the configured interval.
    #[must_use]
    pub fn reconciliation_loop(&self, config: &Config) -> ReconciliationLoop {
        ReconciliationLoop::new(Arc::clone(&self.reconciler), config.reconcile.interval())
    }
}

fn mercadopago_config(config: &Config) -> MercadoPagoConfig {
    let settings = &config.mercadopago;
    let mut client = MercadoPagoConfig::new(settings.access_token.clone());
    client.api_url.clone_from(&settings.api_url);
    client.notification_url.clone_from(&settings.webhook_url);
    client.success_url.clone_from(&settings.success_url);
    client.pending_url.clone_from(&settings.pending_url);
    client.failure_url.clone_from(&settings.failure_url);
    client
}
