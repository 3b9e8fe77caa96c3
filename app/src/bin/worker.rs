//! Raffle reconciliation worker.
//!
//! This binary:
//! - Loads configuration from the environment (and `.env`, if present)
//! - Exposes Prometheus metrics
//! - Migrates the schema and seeds the ticket catalog
//! - Runs the reconciliation loop until Ctrl+C or SIGTERM
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/raffle MP_ACCESS_TOKEN=... cargo run --bin raffle-worker
//! ```

use anyhow::Context;
use raffle_app::{Config, Services};
use raffle_runtime::metrics::MetricsServer;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,raffle=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🎟  Starting raffle worker...");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        total_tickets = config.raffle.total_tickets,
        interval_secs = config.reconcile.interval_secs,
        batch_size = config.reconcile.batch_size,
        "Configuration loaded"
    );

    MetricsServer::new(config.server.metrics_addr)
        .start()
        .context("Failed to start metrics server")?;
    info!(addr = %config.server.metrics_addr, "✓ Metrics server listening");

    let services = Services::from_config(&config).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciliation = tokio::spawn(services.reconciliation_loop(&config).run(shutdown_rx));
    info!("✓ Reconciliation loop started");
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(());

    let timeout = Duration::from_secs(config.server.shutdown_timeout);
    match tokio::time::timeout(timeout, reconciliation).await {
        Ok(Ok(())) => info!("✓ Reconciliation loop stopped"),
        Ok(Err(e)) => warn!(error = %e, "Reconciliation loop panicked"),
        Err(_) => warn!(
            timeout_secs = timeout.as_secs(),
            "Reconciliation loop did not stop in time"
        ),
    }

    services.ledger.pool().close().await;
    info!("Worker stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
