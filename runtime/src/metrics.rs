//! Prometheus metrics for the raffle engine.
//!
//! Recorders group the counters each component emits so call sites stay
//! one-liners. Nothing is exported until [`MetricsServer::start`] installs the
//! Prometheus recorder; before that the `metrics` macros are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use raffle_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use crate::reconciler::ReconcileStats;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Install the Prometheus recorder and start the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a recorder is already installed.
    pub fn start(&self) -> Result<(), MetricsError> {
        register_metrics();

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Orders
    describe_counter!("raffle.orders.created", "Orders created with their tickets reserved");
    describe_counter!(
        "raffle.orders.insufficient_stock",
        "Purchase attempts rejected for lack of tickets"
    );
    describe_counter!("raffle.orders.paid", "Orders moved to PAID");
    describe_counter!(
        "raffle.orders.released",
        "Reservation records released back to the pool"
    );
    describe_counter!(
        "raffle.reserve.collisions",
        "Reservation attempts retried after colliding with a concurrent claim"
    );

    // Reconciliation
    describe_counter!("raffle.reconcile.ticks", "Reconciliation ticks completed");
    describe_counter!(
        "raffle.reconcile.skipped",
        "Reconciliation ticks skipped because the previous one was still running"
    );
    describe_counter!("raffle.reconcile.processed", "Expired orders examined");
    describe_counter!("raffle.reconcile.paid", "Expired orders found paid");
    describe_counter!("raffle.reconcile.extended", "Holds extended for in-flight payments");
    describe_counter!("raffle.reconcile.released", "Expired orders released");
    describe_counter!("raffle.reconcile.failed", "Orders left for the next tick after a failure");
    describe_histogram!("raffle.reconcile.duration_seconds", "Time taken by one tick");

    // Collaborators
    describe_counter!(
        "raffle.notifications.failed",
        "Purchase confirmations that could not be delivered"
    );
    describe_counter!("raffle.retry.attempts", "Payment provider calls retried");
    describe_counter!("raffle.retry.exhausted", "Payment provider calls that ran out of retries");
}

/// Order lifecycle metrics recorder.
pub struct OrderMetrics;

impl OrderMetrics {
    /// Record a created order.
    pub fn record_created() {
        counter!("raffle.orders.created").increment(1);
    }

    /// Record a purchase attempt rejected for lack of stock.
    pub fn record_insufficient_stock() {
        counter!("raffle.orders.insufficient_stock").increment(1);
    }

    /// Record an order moved to `PAID`.
    pub fn record_paid() {
        counter!("raffle.orders.paid").increment(1);
    }

    /// Record released reservation records.
    pub fn record_released(count: u64) {
        if count > 0 {
            counter!("raffle.orders.released").increment(count);
        }
    }
}

/// Reconciliation metrics recorder.
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    /// Record a completed tick.
    pub fn record_tick(stats: &ReconcileStats, duration: Duration) {
        counter!("raffle.reconcile.ticks").increment(1);
        counter!("raffle.reconcile.processed").increment(stats.processed);
        counter!("raffle.reconcile.paid").increment(stats.paid);
        counter!("raffle.reconcile.extended").increment(stats.extended);
        counter!("raffle.reconcile.released").increment(stats.released);
        counter!("raffle.reconcile.failed").increment(stats.failed);
        histogram!("raffle.reconcile.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a skipped tick.
    pub fn record_skipped() {
        counter!("raffle.reconcile.skipped").increment(1);
    }
}

/// Notification metrics recorder.
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// Record a failed delivery.
    pub fn record_failure() {
        counter!("raffle.notifications.failed").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt(operation: &'static str) {
        counter!("raffle.retry.attempts", "operation" => operation).increment(1);
    }

    /// Record a call that ran out of retries.
    pub fn record_exhausted(operation: &'static str) {
        counter!("raffle.retry.exhausted", "operation" => operation).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorders_are_noops_without_exporter() {
        OrderMetrics::record_created();
        OrderMetrics::record_released(0);
        ReconcileMetrics::record_tick(&ReconcileStats::default(), Duration::from_millis(5));
        ReconcileMetrics::record_skipped();
        NotificationMetrics::record_failure();
        RetryMetrics::record_attempt("test");
    }
}
