//! Post-credit settlement and its reconciliation.
//!
//! Settlement runs after the tipper already has their answer. A failed
//! settle never reverts the credit; it is recorded on the tip's settlement
//! row and retried by reconciliation until the attempt budget runs out.

use super::facilitator::{Facilitator, SettleResult};
use super::header::PaymentPayload;
use super::requirements::PaymentRequirements;
use crate::error::Result;
use crate::event::{emit, ServiceEvent, ServiceEventsSender};
use crate::ledger::{spawn_ledger, PayoutLedger, SettlementStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How a settle attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The facilitator executed the transfer.
    Settled {
        /// Transaction hash, when reported.
        transaction_hash: Option<String>,
    },
    /// Settle failed; the tip stays credited and awaits reconciliation.
    Failed {
        /// Failure description.
        error: String,
    },
}

impl SettlementOutcome {
    /// Whether the transfer executed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled { .. })
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Settlements re-attempted.
    pub attempted: usize,
    /// Now settled.
    pub settled: usize,
    /// Still failing.
    pub failed: usize,
}

/// Settles credited tips and records the result.
#[derive(Clone)]
pub struct Settler {
    facilitator: Arc<dyn Facilitator>,
    ledger: Arc<PayoutLedger>,
    timeout: Duration,
    events: Option<ServiceEventsSender>,
}

impl Settler {
    /// Create a settler.
    #[must_use]
    pub fn new(
        facilitator: Arc<dyn Facilitator>,
        ledger: Arc<PayoutLedger>,
        timeout: Duration,
        events: Option<ServiceEventsSender>,
    ) -> Self {
        Self {
            facilitator,
            ledger,
            timeout,
            events,
        }
    }

    /// Settle one credited tip and record the outcome.
    pub async fn settle(
        &self,
        tip_vote_id: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> SettlementOutcome {
        let result = tokio::time::timeout(self.timeout, self.facilitator.settle(payload, requirements))
            .await
            .unwrap_or_else(|_| SettleResult::failed("settle timed out"));

        let outcome = if result.success {
            SettlementOutcome::Settled {
                transaction_hash: result.transaction_hash,
            }
        } else {
            SettlementOutcome::Failed {
                error: result
                    .error
                    .unwrap_or_else(|| "settlement failed".to_string()),
            }
        };

        let (status, hash, error) = match &outcome {
            SettlementOutcome::Settled { transaction_hash } => {
                (SettlementStatus::Settled, transaction_hash.clone(), None)
            }
            SettlementOutcome::Failed { error } => {
                (SettlementStatus::Failed, None, Some(error.clone()))
            }
        };
        let id = tip_vote_id.to_string();
        let recorded = spawn_ledger(&self.ledger, move |ledger| {
            ledger.record_settlement(&id, status, hash.as_deref(), error.as_deref(), Utc::now())
        })
        .await;
        if let Err(e) = recorded {
            warn!(tip_vote_id, "Failed to record settlement outcome: {e}");
        }

        match &outcome {
            SettlementOutcome::Settled { transaction_hash } => {
                info!(tip_vote_id, tx = ?transaction_hash, "Tip settled");
                self.emit(ServiceEvent::SettlementSettled {
                    tip_vote_id: tip_vote_id.to_string(),
                    transaction_hash: transaction_hash.clone(),
                });
            }
            SettlementOutcome::Failed { error } => {
                warn!(tip_vote_id, "Settlement failed, flagged for reconciliation: {error}");
                self.emit(ServiceEvent::SettlementFailed {
                    tip_vote_id: tip_vote_id.to_string(),
                    error: error.clone(),
                });
            }
        }

        outcome
    }

    /// Re-attempt failed settlements and pending ones untouched since
    /// `stale_before`, up to `max_attempts` attempts each.
    ///
    /// # Errors
    ///
    /// Returns an error if the candidates cannot be read.
    pub async fn reconcile(
        &self,
        max_attempts: u32,
        stale_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<ReconcileReport> {
        let candidates = spawn_ledger(&self.ledger, move |ledger| {
            ledger.settlements_needing_retry(max_attempts, stale_before, limit)
        })
        .await?;

        let mut report = ReconcileReport::default();
        for settlement in candidates {
            let decoded = serde_json::from_str::<PaymentPayload>(&settlement.payload_json).and_then(
                |payload| {
                    serde_json::from_str::<PaymentRequirements>(&settlement.requirements_json)
                        .map(|requirements| (payload, requirements))
                },
            );
            let (payload, requirements) = match decoded {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(tip_vote_id = %settlement.tip_vote_id, "Stored settlement is unreadable: {e}");
                    continue;
                }
            };

            report.attempted += 1;
            if self.settle(&settlement.tip_vote_id, &payload, &requirements).await.is_settled() {
                report.settled += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                settled = report.settled,
                failed = report.failed,
                "Settlement reconciliation complete"
            );
        }
        Ok(report)
    }

    fn emit(&self, event: ServiceEvent) {
        if let Some(events) = &self.events {
            emit(events, event);
        }
    }
}
