//! Payout processing.
//!
//! Pending entries are paid through a pluggable [`PayoutExecutor`]
//! (custodial transfers live outside this crate). Each entry moves
//! `pending → paid` or `pending → failed` with a guarded update, so a
//! crashed or overlapping run can never pay an entry twice through the
//! ledger.

use super::{query_entries, spawn_ledger, PayoutEntry, PayoutLedger, PayoutStatus, RecipientKind, PAYOUT_COLUMNS};
use crate::error::Result;
use crate::wallet::{parse_wallet_address, WalletAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Transfer reference recorded for retained platform shares.
pub const RETAINED_REFERENCE: &str = "retained";

/// Executes one transfer to a payout wallet.
#[async_trait]
pub trait PayoutExecutor: Send + Sync {
    /// Transfer `entry.amount_cents` to `to`, returning a transfer reference.
    ///
    /// # Errors
    ///
    /// Any error marks the entry `failed` with the error text.
    async fn transfer(&self, entry: &PayoutEntry, to: &WalletAddress) -> Result<String>;
}

/// Executor that performs no transfer. For mock deployments and tests.
#[derive(Debug, Default)]
pub struct MockPayoutExecutor {
    transfers: AtomicU64,
}

impl MockPayoutExecutor {
    /// Create a mock executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers performed so far.
    #[must_use]
    pub fn transfers(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PayoutExecutor for MockPayoutExecutor {
    async fn transfer(&self, entry: &PayoutEntry, to: &WalletAddress) -> Result<String> {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(entry.id.to_be_bytes());
        hasher.update(to.as_bytes());
        hasher.update(entry.amount_cents.to_be_bytes());
        Ok(format!("mock-{}", hex::encode(hasher.finalize())))
    }
}

/// Counts from one payout run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRunReport {
    /// Entries transferred.
    pub paid: usize,
    /// Entries whose transfer failed.
    pub failed: usize,
    /// Platform entries retained without transfer.
    pub retained: usize,
    /// Entries left pending (no destination wallet yet).
    pub skipped: usize,
    /// Cents transferred.
    pub paid_cents: u64,
    /// Another run was in progress; nothing was done.
    pub already_running: bool,
}

/// Single-flight payout runner.
pub struct PayoutProcessor {
    ledger: Arc<PayoutLedger>,
    batch_size: u32,
    running: Mutex<()>,
}

impl PayoutProcessor {
    /// Create a processor handling at most `batch_size` entries per run.
    #[must_use]
    pub fn new(ledger: Arc<PayoutLedger>, batch_size: u32) -> Self {
        Self {
            ledger,
            batch_size: batch_size.max(1),
            running: Mutex::new(()),
        }
    }

    /// Pay out the oldest pending entries.
    ///
    /// Returns immediately with `already_running` set if another run holds
    /// the processor.
    ///
    /// # Errors
    ///
    /// Returns an error on ledger failure. Executor failures are recorded
    /// on the entry, not returned.
    pub async fn run(&self, executor: &dyn PayoutExecutor, now: DateTime<Utc>) -> Result<PayoutRunReport> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Payout run already in progress");
            return Ok(PayoutRunReport {
                already_running: true,
                ..PayoutRunReport::default()
            });
        };

        let mut report = PayoutRunReport::default();
        let limit = self.batch_size;
        let entries = spawn_ledger(&self.ledger, move |ledger| ledger.payable_entries(limit)).await?;
        for entry in entries {
            let id = entry.id;
            if entry.recipient_kind == RecipientKind::Platform {
                if self.paid(id, RETAINED_REFERENCE.to_string(), now).await? {
                    report.retained += 1;
                }
                continue;
            }

            let lookup = entry.clone();
            let destination =
                spawn_ledger(&self.ledger, move |ledger| ledger.resolve_destination(&lookup)).await?;
            let Some(destination) = destination else {
                debug!(entry_id = id, kind = entry.recipient_kind.as_str(), "No destination wallet yet");
                report.skipped += 1;
                continue;
            };

            let to = match parse_wallet_address(&destination) {
                Ok(to) => to,
                Err(e) => {
                    warn!(entry_id = id, "Invalid destination {destination}: {e}");
                    if self.fail(id, e.to_string(), now).await? {
                        report.failed += 1;
                    }
                    continue;
                }
            };

            match executor.transfer(&entry, &to).await {
                Ok(reference) => {
                    if self.paid(id, reference, now).await? {
                        report.paid += 1;
                        report.paid_cents += entry.amount_cents;
                    }
                }
                Err(e) => {
                    warn!(entry_id = id, "Payout transfer failed: {e}");
                    if self.fail(id, e.to_string(), now).await? {
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            paid = report.paid,
            failed = report.failed,
            retained = report.retained,
            skipped = report.skipped,
            "Payout run complete"
        );
        Ok(report)
    }

    async fn paid(&self, id: i64, reference: String, now: DateTime<Utc>) -> Result<bool> {
        spawn_ledger(&self.ledger, move |ledger| ledger.mark_paid(id, &reference, now)).await
    }

    async fn fail(&self, id: i64, reason: String, now: DateTime<Utc>) -> Result<bool> {
        spawn_ledger(&self.ledger, move |ledger| ledger.mark_failed(id, &reason, now)).await
    }
}

impl PayoutLedger {
    /// Oldest pending entries, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn payable_entries(&self, limit: u32) -> Result<Vec<PayoutEntry>> {
        self.read(|conn| {
            query_entries(
                conn,
                &format!(
                    "SELECT {PAYOUT_COLUMNS} FROM payout_entries
                     WHERE status = 'pending' ORDER BY id LIMIT ?1"
                ),
                params![limit],
            )
        })
    }

    /// Destination wallet of a pending entry: its own address, else the
    /// agent's wallet (agent entries) or the configured treasury (treasury
    /// entries).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn resolve_destination(&self, entry: &PayoutEntry) -> Result<Option<String>> {
        if let Some(address) = &entry.recipient_address {
            return Ok(Some(address.clone()));
        }
        match entry.recipient_kind {
            RecipientKind::Agent => {
                let Some(agent_id) = entry.agent_id.as_deref() else {
                    return Ok(None);
                };
                self.read(|conn| {
                    let wallet: Option<Option<String>> = conn
                        .query_row(
                            "SELECT agent_wallet FROM agents WHERE id = ?1",
                            params![agent_id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    Ok(wallet.flatten())
                })
            }
            RecipientKind::Treasury => Ok(self.settings().treasury_address.clone()),
            RecipientKind::Creator | RecipientKind::Platform => Ok(None),
        }
    }

    /// Mark a pending entry paid. Returns `false` if it was no longer pending.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn mark_paid(&self, entry_id: i64, tx_reference: &str, now: DateTime<Utc>) -> Result<bool> {
        self.resolve_entry(entry_id, PayoutStatus::Paid, Some(tx_reference), None, now)
    }

    /// Mark a pending entry failed. Returns `false` if it was no longer pending.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn mark_failed(&self, entry_id: i64, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        self.resolve_entry(entry_id, PayoutStatus::Failed, None, Some(reason), now)
    }

    fn resolve_entry(
        &self,
        entry_id: i64,
        status: PayoutStatus,
        tx_reference: Option<&str>,
        failure_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        debug_assert!(PayoutStatus::Pending.can_transition_to(status));
        self.transact(|tx| {
            let updated = tx.execute(
                "UPDATE payout_entries
                 SET status = ?1, tx_reference = ?2, failure_reason = ?3, resolved_at = ?4
                 WHERE id = ?5 AND status = 'pending'",
                params![status.as_str(), tx_reference, failure_reason, now.timestamp(), entry_id],
            )?;
            Ok(updated == 1)
        })
    }
}
