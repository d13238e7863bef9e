//! Scheduled maintenance: payouts, escrow sweep, settlement reconciliation.
//!
//! Every step is idempotent and guarded only by time and status columns, so
//! cycles may overlap each other and live tip traffic.

use crate::config::{SchedulerConfig, TipjarConfig};
use crate::error::{Error, Result};
use crate::event::{
    create_event_channel, emit, ServiceEvent, ServiceEventsChannel, ServiceEventsSender,
};
use crate::ledger::{
    spawn_ledger, PayoutExecutor, PayoutLedger, PayoutProcessor, PayoutRunReport, SweepSummary,
};
use crate::payment::{ReconcileReport, Settler};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Minimum age of a pending settlement before reconciliation retries it.
const MIN_STALE_PENDING_SECS: i64 = 15 * 60;
const MAX_STALE_PENDING_SECS: i64 = 24 * 60 * 60;

/// How long consumed or expired ownership challenges are kept.
const CHALLENGE_RETENTION_HOURS: i64 = 24;

/// What one maintenance cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Payout run, when payouts are enabled.
    pub payouts: Option<PayoutRunReport>,
    /// Funds swept to the treasury.
    pub funds_swept: usize,
    /// Cents swept to the treasury.
    pub swept_cents: u64,
    /// Settlement reconciliation, when enabled.
    pub reconciled: Option<ReconcileReport>,
    /// Ownership challenges purged.
    pub challenges_purged: usize,
}

/// One maintenance cycle's collaborators.
pub struct Maintenance {
    ledger: Arc<PayoutLedger>,
    config: SchedulerConfig,
    stale_after: ChronoDuration,
    processor: PayoutProcessor,
    executor: Option<Arc<dyn PayoutExecutor>>,
    settler: Option<Settler>,
    events: ServiceEventsSender,
}

impl Maintenance {
    /// Run one cycle at `now`.
    ///
    /// A failing step is logged and reported as an event; the remaining
    /// steps still run. The first error is returned after all steps ran.
    ///
    /// # Errors
    ///
    /// Returns the first step error, if any.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        let mut first_error: Option<Error> = None;

        if self.config.process_payouts {
            match &self.executor {
                Some(executor) => match self.processor.run(executor.as_ref(), now).await {
                    Ok(run) => {
                        if !run.already_running {
                            self.emit(ServiceEvent::PayoutsProcessed {
                                paid: run.paid,
                                failed: run.failed,
                            });
                        }
                        report.payouts = Some(run);
                    }
                    Err(e) => self.record_failure("payout run", e, &mut first_error),
                },
                None => warn!("Payout processing enabled but no payout executor configured"),
            }
        }

        match spawn_ledger(&self.ledger, move |ledger| ledger.sweep(now)).await {
            Ok(SweepSummary {
                funds_swept,
                amount_cents,
                ..
            }) => {
                report.funds_swept = funds_swept;
                report.swept_cents = amount_cents;
                if funds_swept > 0 {
                    self.emit(ServiceEvent::FundsSwept {
                        funds: funds_swept,
                        amount_cents,
                    });
                }
            }
            Err(e) => self.record_failure("escrow sweep", e, &mut first_error),
        }

        if self.config.reconcile_settlements {
            if let Some(settler) = &self.settler {
                let stale_before = now - self.stale_after;
                match settler
                    .reconcile(self.config.max_settle_attempts, stale_before, self.config.payout_batch_size)
                    .await
                {
                    Ok(reconciled) => report.reconciled = Some(reconciled),
                    Err(e) => self.record_failure("settlement reconciliation", e, &mut first_error),
                }
            }
        }

        let cutoff = now - ChronoDuration::hours(CHALLENGE_RETENTION_HOURS);
        match spawn_ledger(&self.ledger, move |ledger| ledger.purge_wallet_challenges(cutoff)).await {
            Ok(purged) => report.challenges_purged = purged,
            Err(e) => self.record_failure("challenge purge", e, &mut first_error),
        }

        debug!(?report, "Maintenance cycle complete");
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn record_failure(&self, step: &str, error: Error, first_error: &mut Option<Error>) {
        warn!("Maintenance step '{step}' failed: {error}");
        self.emit(ServiceEvent::Error {
            message: format!("{step} failed: {error}"),
        });
        if first_error.is_none() {
            *first_error = Some(error);
        }
    }

    fn emit(&self, event: ServiceEvent) {
        emit(&self.events, event);
    }
}

/// Shared-secret guarded entry point for externally triggered cycles.
#[derive(Clone)]
pub struct InternalTrigger {
    secret: Option<String>,
    maintenance: Arc<Maintenance>,
}

impl InternalTrigger {
    /// Run a cycle if `presented` matches the configured secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] if no secret is configured or the
    /// presented one differs, otherwise the cycle's result.
    pub async fn invoke(&self, presented: &str) -> Result<MaintenanceReport> {
        let Some(secret) = self.secret.as_deref() else {
            warn!("Internal trigger invoked but no secret is configured");
            return Err(Error::Unauthorized);
        };
        if !secrets_match(secret, presented) {
            warn!("Internal trigger rejected: bad secret");
            return Err(Error::Unauthorized);
        }
        info!("Internal trigger accepted, running maintenance");
        self.maintenance.run_cycle(Utc::now()).await
    }
}

/// Compare secrets in time independent of where they differ.
fn secrets_match(expected: &str, presented: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(presented.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Builder for the maintenance service.
pub struct MaintenanceBuilder {
    config: Arc<TipjarConfig>,
    ledger: Arc<PayoutLedger>,
    executor: Option<Arc<dyn PayoutExecutor>>,
    settler: Option<Settler>,
}

impl MaintenanceBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new(config: Arc<TipjarConfig>, ledger: Arc<PayoutLedger>) -> Self {
        Self {
            config,
            ledger,
            executor: None,
            settler: None,
        }
    }

    /// Executor used when `scheduler.process_payouts` is on.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn PayoutExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Settler used for settlement reconciliation.
    #[must_use]
    pub fn with_settler(mut self, settler: Settler) -> Self {
        self.settler = Some(settler);
        self
    }

    /// Build the service.
    #[must_use]
    pub fn build(self) -> RunningMaintenance {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = create_event_channel();

        let timeout_secs = i64::try_from(self.config.payment.max_timeout_seconds)
            .unwrap_or(MAX_STALE_PENDING_SECS);
        let stale_secs = timeout_secs
            .saturating_mul(2)
            .clamp(MIN_STALE_PENDING_SECS, MAX_STALE_PENDING_SECS);

        let maintenance = Maintenance {
            processor: PayoutProcessor::new(
                Arc::clone(&self.ledger),
                self.config.scheduler.payout_batch_size,
            ),
            ledger: self.ledger,
            config: self.config.scheduler.clone(),
            stale_after: ChronoDuration::seconds(stale_secs),
            executor: self.executor,
            settler: self.settler,
            events: events_tx.clone(),
        };

        info!(
            interval_minutes = self.config.scheduler.interval_minutes,
            process_payouts = self.config.scheduler.process_payouts,
            "Maintenance service built"
        );

        RunningMaintenance {
            interval: Duration::from_secs(self.config.scheduler.interval_minutes.saturating_mul(60)),
            secret: self.config.scheduler.internal_secret.clone(),
            maintenance: Arc::new(maintenance),
            shutdown_tx,
            shutdown_rx,
            events_tx,
            events_rx: Some(events_rx),
        }
    }
}

/// The maintenance service.
pub struct RunningMaintenance {
    interval: Duration,
    secret: Option<String>,
    maintenance: Arc<Maintenance>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: ServiceEventsSender,
    events_rx: Option<ServiceEventsChannel>,
}

impl RunningMaintenance {
    /// Get a receiver for service events.
    ///
    /// Note: Can only be called once. Subsequent calls return None.
    pub fn events(&mut self) -> Option<ServiceEventsChannel> {
        self.events_rx.take()
    }

    /// Subscribe to service events.
    #[must_use]
    pub fn subscribe_events(&self) -> ServiceEventsChannel {
        self.events_tx.subscribe()
    }

    /// Sender for components (such as the tip workflow) that publish on
    /// the same stream.
    #[must_use]
    pub fn events_sender(&self) -> ServiceEventsSender {
        self.events_tx.clone()
    }

    /// Shared-secret guarded trigger for this service.
    #[must_use]
    pub fn trigger(&self) -> InternalTrigger {
        InternalTrigger {
            secret: self.secret.clone(),
            maintenance: Arc::clone(&self.maintenance),
        }
    }

    /// Run a single cycle now.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub async fn run_once(&self) -> Result<MaintenanceReport> {
        self.maintenance.run_cycle(Utc::now()).await
    }

    /// Run cycles on the configured interval until shutdown or Ctrl-C.
    ///
    /// # Errors
    ///
    /// Cycle failures are logged, not returned; this only returns `Ok`.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting maintenance service");
        emit(&self.events_tx, ServiceEvent::Started);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, initiating shutdown");
                    self.shutdown();
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.maintenance.run_cycle(Utc::now()).await {
                        warn!("Maintenance cycle failed: {e}");
                    }
                }
            }
        }

        emit(&self.events_tx, ServiceEvent::ShuttingDown);
        info!("Maintenance service stopped");
        Ok(())
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Handle that can request shutdown from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }
}
