//! Reconciliation of lapsed holds against the payment provider.
//!
//! [`Reconciler::run_once`] claims a batch of expired `PENDING` orders, asks
//! the provider what happened to each one and drives it to its terminal
//! state. [`ReconciliationLoop`] runs it on a fixed interval and never lets
//! two ticks overlap: a tick that comes due while the previous one is still
//! running is skipped, not queued.
//!
//! Provider calls happen after the claim has committed, so a slow provider
//! never holds database locks. The claim is a lease (`claim_ttl`); an order
//! left `PENDING` by a tick becomes claimable again once it runs out.

use crate::lifecycle::{LifecycleError, OrderLifecycle};
use crate::metrics::ReconcileMetrics;
use crate::notify::notify_purchase;
use crate::retry::{RetryPolicy, retry_transient};
use raffle_core::environment::Clock;
use raffle_core::{
    Order, PaymentProvider, PaymentProviderError, PaymentStatus, ProviderPayment,
    PurchaseNotifier, ReleaseReason,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Reconciliation settings.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Orders claimed per tick
    pub batch_size: usize,
    /// How long a claim keeps other reconcilers away from an order
    pub claim_ttl: chrono::Duration,
    /// Retry policy for provider lookups
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            claim_ttl: chrono::Duration::minutes(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Orders claimed and examined
    pub processed: u64,
    /// Orders this tick moved to `PAID`
    pub paid: u64,
    /// Holds kept because a payment is still in flight
    pub extended: u64,
    /// Orders this tick closed and released
    pub released: u64,
    /// Orders left untouched after a lookup or ledger failure
    pub failed: u64,
}

/// One pass of reconciliation over a batch of expired orders.
pub struct Reconciler {
    lifecycle: OrderLifecycle,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn PurchaseNotifier>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        lifecycle: OrderLifecycle,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn PurchaseNotifier>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            lifecycle,
            provider,
            notifier,
            clock,
            config,
        }
    }

    /// Claim one batch of expired `PENDING` orders and reconcile each.
    ///
    /// A failure on one order is logged and counted in
    /// [`ReconcileStats::failed`]; the rest of the batch still runs.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Ledger`] only if the batch cannot be claimed.
    pub async fn run_once(&self) -> Result<ReconcileStats, LifecycleError> {
        let now = self.clock.now();
        let claim_until = now + self.config.claim_ttl;
        let orders = self
            .lifecycle
            .ledger()
            .find_expired_pending(now, self.config.batch_size, claim_until)
            .await?;

        let mut stats = ReconcileStats::default();
        for order in &orders {
            stats.processed += 1;
            self.reconcile_order(order, &mut stats).await;
        }

        if stats.processed > 0 {
            tracing::info!(
                processed = stats.processed,
                paid = stats.paid,
                extended = stats.extended,
                released = stats.released,
                failed = stats.failed,
                "Reconciliation batch finished"
            );
        } else {
            tracing::debug!("No expired orders to reconcile");
        }
        Ok(stats)
    }

    async fn reconcile_order(&self, order: &Order, stats: &mut ReconcileStats) {
        let payment = match self.lookup(order).await {
            Ok(payment) => payment,
            Err(e) => {
                tracing::warn!(
                    order_id = %order.id,
                    error = %e,
                    "Payment lookup failed, order left for the next tick"
                );
                stats.failed += 1;
                return;
            }
        };

        if let Err(e) = self.apply(order, payment, stats).await {
            tracing::error!(
                order_id = %order.id,
                error = %e,
                "Reconciliation transition failed, order left for the next tick"
            );
            stats.failed += 1;
        }
    }

    /// Stored payment reference first, then the latest payment for the order.
    async fn lookup(&self, order: &Order) -> Result<Option<ProviderPayment>, PaymentProviderError> {
        if let Some(payment_ref) = order.payment_ref.as_deref() {
            let payment = retry_transient(&self.config.retry, "get_payment", || {
                self.provider.get_payment(payment_ref)
            })
            .await?;
            if payment.is_some() {
                return Ok(payment);
            }
        }

        retry_transient(&self.config.retry, "find_latest_payment", || {
            self.provider.find_latest_payment_for_order(order.id)
        })
        .await
    }

    async fn apply(
        &self,
        order: &Order,
        payment: Option<ProviderPayment>,
        stats: &mut ReconcileStats,
    ) -> Result<(), LifecycleError> {
        let Some(payment) = payment else {
            tracing::info!(order_id = %order.id, "No payment found for expired order");
            return self.release(order, ReleaseReason::Expired, stats).await;
        };

        match &payment.status {
            PaymentStatus::Approved => {
                let outcome = self
                    .lifecycle
                    .handle_payment_approved(order.id, &payment.id, payment.amount)
                    .await?;
                if outcome.changed {
                    stats.paid += 1;
                    if let Some(details) = outcome.order {
                        notify_purchase(self.notifier.as_ref(), &details).await;
                    }
                }
                Ok(())
            }
            status if status.is_in_flight() => {
                self.lifecycle.add_pending_payment(order.id, &payment.id).await?;
                stats.extended += 1;
                tracing::info!(
                    order_id = %order.id,
                    payment_ref = %payment.id,
                    status = %status,
                    "Payment still in flight, hold extended"
                );
                Ok(())
            }
            status => {
                // Statuses outside the vocabulary are treated like a lapsed hold.
                let reason = status.failure_reason().unwrap_or(ReleaseReason::Expired);
                tracing::info!(
                    order_id = %order.id,
                    payment_ref = %payment.id,
                    status = %status,
                    reason = %reason,
                    "Payment did not complete"
                );
                self.release(order, reason, stats).await
            }
        }
    }

    async fn release(
        &self,
        order: &Order,
        reason: ReleaseReason,
        stats: &mut ReconcileStats,
    ) -> Result<(), LifecycleError> {
        let outcome = self
            .lifecycle
            .handle_payment_failed_or_expired(order.id, reason)
            .await?;
        if outcome.changed > 0 {
            stats.released += 1;
        }
        Ok(())
    }
}

/// Result of one [`ReconciliationLoop::tick`].
#[derive(Debug)]
pub enum TickOutcome {
    /// The tick ran to completion.
    Completed(ReconcileStats),
    /// The previous tick was still running.
    Skipped,
    /// The batch could not be claimed.
    Failed(LifecycleError),
}

/// Clears the running flag when a tick ends, even if it is cancelled.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight periodic driver for a [`Reconciler`].
///
/// Cheap to clone; clones share the re-entrancy guard.
#[derive(Clone)]
pub struct ReconciliationLoop {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl ReconciliationLoop {
    /// Create a loop ticking every `interval`.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a tick is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one tick unless another one is in progress.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Previous reconciliation tick still running, skipping");
            ReconcileMetrics::record_skipped();
            return TickOutcome::Skipped;
        }
        let _guard = RunningGuard(Arc::clone(&self.running));

        let started = Instant::now();
        match self.reconciler.run_once().await {
            Ok(stats) => {
                ReconcileMetrics::record_tick(&stats, started.elapsed());
                TickOutcome::Completed(stats)
            }
            Err(e) => {
                tracing::error!(error = %e, "Reconciliation tick failed");
                TickOutcome::Failed(e)
            }
        }
    }

    /// Tick immediately, then every interval, until `shutdown` fires.
    ///
    /// Each tick runs on its own task, so a tick outlasting the interval
    /// makes the next one skip instead of delaying the schedule. On shutdown
    /// the in-flight tick, if any, is awaited.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Reconciliation loop started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Vec<JoinHandle<TickOutcome>> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Reconciliation loop received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    in_flight.retain(|handle| !handle.is_finished());
                    let this = self.clone();
                    in_flight.push(tokio::spawn(async move { this.tick().await }));
                }
            }
        }

        if in_flight.iter().any(|handle| !handle.is_finished()) {
            tracing::info!("Waiting for in-flight reconciliation tick");
        }
        for handle in in_flight {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Reconciliation tick task aborted");
            }
        }
        tracing::info!("Reconciliation loop stopped");
    }
}
