//! Durable payout ledger.
//!
//! The ledger is the only shared mutable state in the service. Every
//! mutation runs inside one `BEGIN IMMEDIATE` SQLite transaction, so the
//! per-clip vote/tip increments, the tip vote row and its payout entries
//! commit together or not at all.
//!
//! # Fund lifecycle
//!
//! ```text
//! verified tip
//!      │
//!      ▼
//! ┌──────────────────────────────┐
//! │ TipVote + clip totals + split│
//! └──────────────┬───────────────┘
//!                │
//!     creator wallet registered?
//!         ┌──────┴──────┐
//!        YES            NO
//!         │             │
//!         ▼             ▼
//!     pending      escrowed + UnclaimedFund
//!                       │
//!              ┌────────┴────────┐
//!          wallet set        expires_at < now
//!              │                 │
//!              ▼                 ▼
//!       claim → pending    sweep → treasury entry
//! ```

mod escrow;
mod payouts;
mod schema;
mod types;
mod wallets;

pub use escrow::{ClaimSummary, SweepSummary};
pub use payouts::{MockPayoutExecutor, PayoutExecutor, PayoutProcessor, PayoutRunReport};
pub use schema::SCHEMA_VERSION;
pub use types::{
    Agent, ClipVariant, PayoutEntry, PayoutStatus, RecipientKind, Settlement, SettlementStatus,
    TipVote, UnclaimedFund,
};

use crate::config::TipjarConfig;
use crate::error::{Error, Result, REASON_PAYMENT_ALREADY_USED};
use crate::revenue::RevenueSplit;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::from_unix;

const PAYOUT_COLUMNS: &str = "id, recipient_kind, recipient_address, amount_cents, status, \
     subject_id, agent_id, created_at, resolved_at, tx_reference, failure_reason";

const FUND_COLUMNS: &str = "id, agent_id, payout_entry_id, amount_cents, created_at, expires_at, \
     claimed_at, swept_at";

const SETTLEMENT_COLUMNS: &str = "tip_vote_id, status, transaction_hash, error, attempts, \
     payload_json, requirements_json, updated_at";

/// Ledger settings derived from [`TipjarConfig`].
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Lifetime of an escrowed creator share.
    pub escrow_ttl: ChronoDuration,
    /// Wallet receiving swept escrow.
    pub treasury_address: Option<String>,
    /// Attempts made when SQLite reports the database busy.
    pub busy_retries: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            escrow_ttl: ChronoDuration::days(30),
            treasury_address: None,
            busy_retries: 5,
        }
    }
}

impl From<&TipjarConfig> for LedgerSettings {
    fn from(config: &TipjarConfig) -> Self {
        Self {
            escrow_ttl: config.escrow_ttl(),
            treasury_address: config.ledger.treasury_address.clone(),
            busy_retries: config.ledger.busy_retries,
        }
    }
}

/// A verified tip ready to be credited.
#[derive(Debug, Clone)]
pub struct TipCredit {
    /// Voted clip variant.
    pub clip_variant_id: String,
    /// Payer wallet.
    pub payer_address: String,
    /// Tip amount in cents.
    pub amount_cents: u64,
    /// Replay guard key.
    pub authorization_id: String,
    /// Precomputed revenue split of `amount_cents`.
    pub split: RevenueSplit,
    /// Platform wallet for the platform share.
    pub platform_address: Option<String>,
    /// Serialized payload kept for settlement retries.
    pub payload_json: String,
    /// Serialized requirements kept for settlement retries.
    pub requirements_json: String,
}

/// The shares of one subject to append to the ledger.
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    /// Originating tip vote.
    pub subject_id: String,
    /// Agent behind the tipped clip.
    pub agent_id: String,
    /// Split to record.
    pub split: RevenueSplit,
    /// Platform wallet for the platform share.
    pub platform_address: Option<String>,
}

/// Entries written by [`PayoutLedger::record_payout`].
#[derive(Debug, Clone, Default)]
pub struct RecordedPayout {
    /// Every payout entry written (including the escrowed creator entry).
    pub entries: Vec<PayoutEntry>,
    /// Escrow created when the creator had no wallet.
    pub escrowed: Option<UnclaimedFund>,
}

/// Result of crediting a tip.
#[derive(Debug, Clone)]
pub struct CreditedTip {
    /// The new tip vote.
    pub tip_vote: TipVote,
    /// Clip totals after the increment.
    pub clip_variant: ClipVariant,
    /// The recorded split.
    pub split: RevenueSplit,
    /// Payout rows written.
    pub payouts: RecordedPayout,
}

/// SQLite-backed payout ledger.
pub struct PayoutLedger {
    conn: Mutex<Connection>,
    settings: LedgerSettings,
}

impl std::fmt::Debug for PayoutLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayoutLedger")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PayoutLedger {
    /// Open or create the ledger database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path, settings: LedgerSettings) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!("Opened payout ledger at {}", path.display());
        Self::from_connection(conn, settings)
    }

    /// Open an in-memory ledger (for tests and mock deployments).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_memory(settings: LedgerSettings) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, settings)
    }

    /// Open the ledger configured in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn from_config(config: &TipjarConfig) -> Result<Self> {
        Self::open(&config.ledger.database_path, LedgerSettings::from(config))
    }

    fn from_connection(conn: Connection, settings: LedgerSettings) -> Result<Self> {
        schema::configure(&conn)?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            settings,
        })
    }

    /// Ledger settings.
    #[must_use]
    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Run `f` inside one immediate transaction, retrying when the database
    /// is busy. Errors returned by `f` roll the transaction back.
    pub(crate) fn transact<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = {
                let mut conn = self.conn.lock();
                conn.transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(Error::from)
                    .and_then(|tx| {
                        let value = f(&tx)?;
                        tx.commit()?;
                        Ok(value)
                    })
            };

            match outcome {
                Err(e) if is_busy(&e) => {
                    attempt += 1;
                    if attempt > self.settings.busy_retries {
                        return Err(Error::LedgerConflict(format!(
                            "database busy after {attempt} attempts"
                        )));
                    }
                    warn!("Ledger busy, retrying transaction (attempt {attempt})");
                    std::thread::sleep(Duration::from_millis(10 << attempt.min(6)));
                }
                other => return other,
            }
        }
    }

    /// Run a read-only query against the connection.
    pub(crate) fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Register an agent. Re-registering an existing agent is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn register_agent(&self, agent_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.transact(|tx| {
            tx.execute(
                "INSERT OR IGNORE INTO agents (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
                params![agent_id, now.timestamp()],
            )?;
            Ok(())
        })
    }

    /// Register a clip variant produced by `agent_id`, registering the agent
    /// if needed. Re-registering an existing clip variant is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn register_clip_variant(
        &self,
        clip_variant_id: &str,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transact(|tx| {
            tx.execute(
                "INSERT OR IGNORE INTO agents (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
                params![agent_id, now.timestamp()],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO clip_variants (id, agent_id, created_at) VALUES (?1, ?2, ?3)",
                params![clip_variant_id, agent_id, now.timestamp()],
            )?;
            Ok(())
        })
    }

    /// Look up an agent.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        self.read(|conn| load_agent(conn, agent_id))
    }

    /// Look up a clip variant and its totals.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn clip_variant(&self, clip_variant_id: &str) -> Result<Option<ClipVariant>> {
        self.read(|conn| load_clip_variant(conn, clip_variant_id))
    }

    // ------------------------------------------------------------------
    // Crediting
    // ------------------------------------------------------------------

    /// Credit a verified tip: insert the tip vote, increment the clip's
    /// vote/tip totals, record the payout entries and open a pending
    /// settlement, all in one transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the clip variant is unknown
    /// - [`Error::PaymentRejected`] (`payment_already_used`) if the
    ///   authorization was already credited
    /// - [`Error::LedgerConflict`] if the database stays busy
    pub fn record_tip(&self, credit: &TipCredit, now: DateTime<Utc>) -> Result<CreditedTip> {
        debug_assert_eq!(credit.split.total(), credit.amount_cents);

        let credited = self.transact(|tx| {
            let clip = load_clip_variant(tx, &credit.clip_variant_id)?.ok_or_else(|| {
                Error::NotFound(format!("clip variant {}", credit.clip_variant_id))
            })?;

            let already_used: Option<String> = tx
                .query_row(
                    "SELECT id FROM tip_votes WHERE authorization_id = ?1",
                    params![credit.authorization_id],
                    |row| row.get(0),
                )
                .optional()?;
            if already_used.is_some() {
                return Err(Error::PaymentRejected {
                    reason: REASON_PAYMENT_ALREADY_USED.to_string(),
                });
            }

            let tip_vote = TipVote {
                id: new_id(),
                clip_variant_id: clip.id.clone(),
                payer_address: credit.payer_address.clone(),
                amount_cents: credit.amount_cents,
                authorization_id: credit.authorization_id.clone(),
                created_at: from_unix(now.timestamp()),
            };
            tx.execute(
                "INSERT INTO tip_votes
                    (id, clip_variant_id, payer_address, amount_cents, authorization_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tip_vote.id,
                    tip_vote.clip_variant_id,
                    tip_vote.payer_address,
                    tip_vote.amount_cents as i64,
                    tip_vote.authorization_id,
                    now.timestamp(),
                ],
            )?;

            tx.execute(
                "UPDATE clip_variants
                 SET vote_count = vote_count + 1, tip_total_cents = tip_total_cents + ?1
                 WHERE id = ?2",
                params![credit.amount_cents as i64, clip.id],
            )?;

            let payouts = record_payout_tx(
                tx,
                &PayoutRequest {
                    subject_id: tip_vote.id.clone(),
                    agent_id: clip.agent_id.clone(),
                    split: credit.split,
                    platform_address: credit.platform_address.clone(),
                },
                now,
                self.settings.escrow_ttl,
            )?;

            tx.execute(
                "INSERT INTO settlements
                    (tip_vote_id, status, payload_json, requirements_json, updated_at)
                 VALUES (?1, 'pending', ?2, ?3, ?4)",
                params![
                    tip_vote.id,
                    credit.payload_json,
                    credit.requirements_json,
                    now.timestamp()
                ],
            )?;

            let clip_variant = load_clip_variant(tx, &clip.id)?
                .ok_or_else(|| Error::NotFound(format!("clip variant {}", clip.id)))?;

            Ok(CreditedTip {
                tip_vote,
                clip_variant,
                split: credit.split,
                payouts,
            })
        })?;

        info!(
            tip_vote_id = %credited.tip_vote.id,
            clip_variant_id = %credited.clip_variant.id,
            amount_cents = credited.tip_vote.amount_cents,
            vote_count = credited.clip_variant.vote_count,
            escrowed = credited.payouts.escrowed.is_some(),
            "Tip credited"
        );

        Ok(credited)
    }

    /// Append the payout entries for one subject in its own transaction.
    ///
    /// A creator share whose agent has no creator wallet is written as an
    /// `escrowed` entry backed by a new [`UnclaimedFund`] expiring after the
    /// configured TTL. Zero-cent shares are not written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the agent is unknown.
    pub fn record_payout(
        &self,
        request: &PayoutRequest,
        now: DateTime<Utc>,
    ) -> Result<RecordedPayout> {
        self.transact(|tx| record_payout_tx(tx, request, now, self.settings.escrow_ttl))
    }

    // ------------------------------------------------------------------
    // Settlements
    // ------------------------------------------------------------------

    /// Record the result of a settle attempt. A settled record is never
    /// downgraded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no settlement exists for the tip.
    pub fn record_settlement(
        &self,
        tip_vote_id: &str,
        status: SettlementStatus,
        transaction_hash: Option<&str>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transact(|tx| {
            let exists: Option<String> = tx
                .query_row(
                    "SELECT status FROM settlements WHERE tip_vote_id = ?1",
                    params![tip_vote_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(Error::NotFound(format!("settlement for {tip_vote_id}")));
            }

            tx.execute(
                "UPDATE settlements
                 SET status = ?1, transaction_hash = COALESCE(?2, transaction_hash),
                     error = ?3, attempts = attempts + 1, updated_at = ?4
                 WHERE tip_vote_id = ?5 AND status != 'settled'",
                params![status.as_str(), transaction_hash, error, now.timestamp(), tip_vote_id],
            )?;
            Ok(())
        })
    }

    /// Settlement record for a tip.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn settlement(&self, tip_vote_id: &str) -> Result<Option<Settlement>> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE tip_vote_id = ?1"),
                params![tip_vote_id],
                settlement_from_row,
            )
            .optional()
            .map_err(Error::from)
        })
    }

    /// Settlements eligible for another settle attempt: failed ones, and
    /// pending ones not updated since `stale_before` (their settle task was
    /// lost), with fewer than `max_attempts` attempts.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn settlements_needing_retry(
        &self,
        max_attempts: u32,
        stale_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Settlement>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SETTLEMENT_COLUMNS} FROM settlements
                 WHERE attempts < ?1
                   AND (status = 'failed' OR (status = 'pending' AND updated_at < ?2))
                 ORDER BY updated_at ASC LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![max_attempts, stale_before.timestamp(), limit],
                    settlement_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Tip votes for a clip variant, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn tip_votes_for_clip(&self, clip_variant_id: &str) -> Result<Vec<TipVote>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, clip_variant_id, payer_address, amount_cents, authorization_id, created_at
                 FROM tip_votes WHERE clip_variant_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map(params![clip_variant_id], |row| {
                    Ok(TipVote {
                        id: row.get(0)?,
                        clip_variant_id: row.get(1)?,
                        payer_address: row.get(2)?,
                        amount_cents: row.get::<_, i64>(3)? as u64,
                        authorization_id: row.get(4)?,
                        created_at: from_unix(row.get(5)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Payout entries originating from one tip vote.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn payout_entries_for_tip(&self, tip_vote_id: &str) -> Result<Vec<PayoutEntry>> {
        self.read(|conn| {
            query_entries(
                conn,
                &format!("SELECT {PAYOUT_COLUMNS} FROM payout_entries WHERE subject_id = ?1 ORDER BY id"),
                params![tip_vote_id],
            )
        })
    }

    /// Payout entries in a given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn payout_entries_by_status(&self, status: PayoutStatus) -> Result<Vec<PayoutEntry>> {
        self.read(|conn| {
            query_entries(
                conn,
                &format!("SELECT {PAYOUT_COLUMNS} FROM payout_entries WHERE status = ?1 ORDER BY id"),
                params![status.as_str()],
            )
        })
    }

    /// One payout entry by id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn payout_entry(&self, id: i64) -> Result<Option<PayoutEntry>> {
        self.read(|conn| load_entry(conn, id))
    }
}

// ----------------------------------------------------------------------
// Transaction-scoped helpers
// ----------------------------------------------------------------------

fn record_payout_tx(
    conn: &Connection,
    request: &PayoutRequest,
    now: DateTime<Utc>,
    escrow_ttl: ChronoDuration,
) -> Result<RecordedPayout> {
    let agent = load_agent(conn, &request.agent_id)?
        .ok_or_else(|| Error::NotFound(format!("agent {}", request.agent_id)))?;

    let mut recorded = RecordedPayout::default();
    let split = request.split;

    if split.creator_cents > 0 {
        match agent.creator_wallet.as_deref() {
            Some(wallet) => {
                recorded.entries.push(insert_entry(
                    conn,
                    RecipientKind::Creator,
                    Some(wallet),
                    split.creator_cents,
                    PayoutStatus::Pending,
                    &request.subject_id,
                    Some(&agent.id),
                    now,
                )?);
            }
            None => {
                let entry = insert_entry(
                    conn,
                    RecipientKind::Creator,
                    None,
                    split.creator_cents,
                    PayoutStatus::Escrowed,
                    &request.subject_id,
                    Some(&agent.id),
                    now,
                )?;
                let expires_at = now + escrow_ttl;
                conn.execute(
                    "INSERT INTO unclaimed_funds
                        (agent_id, payout_entry_id, amount_cents, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        agent.id,
                        entry.id,
                        split.creator_cents as i64,
                        now.timestamp(),
                        expires_at.timestamp()
                    ],
                )?;
                let fund_id = conn.last_insert_rowid();
                debug!(
                    agent_id = %agent.id,
                    amount_cents = split.creator_cents,
                    "Creator share escrowed until {expires_at}"
                );
                recorded.escrowed = load_fund(conn, fund_id)?;
                recorded.entries.push(entry);
            }
        }
    }

    if split.platform_cents > 0 {
        recorded.entries.push(insert_entry(
            conn,
            RecipientKind::Platform,
            request.platform_address.as_deref(),
            split.platform_cents,
            PayoutStatus::Pending,
            &request.subject_id,
            None,
            now,
        )?);
    }

    if split.agent_cents > 0 {
        recorded.entries.push(insert_entry(
            conn,
            RecipientKind::Agent,
            agent.agent_wallet.as_deref(),
            split.agent_cents,
            PayoutStatus::Pending,
            &request.subject_id,
            Some(&agent.id),
            now,
        )?);
    }

    Ok(recorded)
}

#[allow(clippy::too_many_arguments)]
fn insert_entry(
    conn: &Connection,
    kind: RecipientKind,
    address: Option<&str>,
    amount_cents: u64,
    status: PayoutStatus,
    subject_id: &str,
    agent_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PayoutEntry> {
    conn.execute(
        "INSERT INTO payout_entries
            (recipient_kind, recipient_address, amount_cents, status, subject_id, agent_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            kind.as_str(),
            address,
            amount_cents as i64,
            status.as_str(),
            subject_id,
            agent_id,
            now.timestamp()
        ],
    )?;
    let id = conn.last_insert_rowid();
    load_entry(conn, id)?.ok_or_else(|| Error::NotFound(format!("payout entry {id}")))
}

fn load_agent(conn: &Connection, agent_id: &str) -> Result<Option<Agent>> {
    conn.query_row(
        "SELECT id, agent_wallet, creator_wallet FROM agents WHERE id = ?1",
        params![agent_id],
        |row| {
            Ok(Agent {
                id: row.get(0)?,
                agent_wallet: row.get(1)?,
                creator_wallet: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(Error::from)
}

fn load_clip_variant(conn: &Connection, clip_variant_id: &str) -> Result<Option<ClipVariant>> {
    conn.query_row(
        "SELECT id, agent_id, vote_count, tip_total_cents FROM clip_variants WHERE id = ?1",
        params![clip_variant_id],
        |row| {
            Ok(ClipVariant {
                id: row.get(0)?,
                agent_id: row.get(1)?,
                vote_count: row.get::<_, i64>(2)? as u64,
                tip_total: row.get::<_, i64>(3)? as u64,
            })
        },
    )
    .optional()
    .map_err(Error::from)
}

fn load_entry(conn: &Connection, id: i64) -> Result<Option<PayoutEntry>> {
    conn.query_row(
        &format!("SELECT {PAYOUT_COLUMNS} FROM payout_entries WHERE id = ?1"),
        params![id],
        entry_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn load_fund(conn: &Connection, id: i64) -> Result<Option<UnclaimedFund>> {
    conn.query_row(
        &format!("SELECT {FUND_COLUMNS} FROM unclaimed_funds WHERE id = ?1"),
        params![id],
        fund_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<PayoutEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, entry_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<PayoutEntry> {
    Ok(PayoutEntry {
        id: row.get(0)?,
        recipient_kind: parse_column(row, 1)?,
        recipient_address: row.get(2)?,
        amount_cents: row.get::<_, i64>(3)? as u64,
        status: parse_column(row, 4)?,
        subject_id: row.get(5)?,
        agent_id: row.get(6)?,
        created_at: from_unix(row.get(7)?),
        resolved_at: row.get::<_, Option<i64>>(8)?.map(from_unix),
        tx_reference: row.get(9)?,
        failure_reason: row.get(10)?,
    })
}

fn fund_from_row(row: &Row<'_>) -> rusqlite::Result<UnclaimedFund> {
    Ok(UnclaimedFund {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        payout_entry_id: row.get(2)?,
        amount_cents: row.get::<_, i64>(3)? as u64,
        created_at: from_unix(row.get(4)?),
        expires_at: from_unix(row.get(5)?),
        claimed_at: row.get::<_, Option<i64>>(6)?.map(from_unix),
        swept_at: row.get::<_, Option<i64>>(7)?.map(from_unix),
    })
}

fn settlement_from_row(row: &Row<'_>) -> rusqlite::Result<Settlement> {
    Ok(Settlement {
        tip_vote_id: row.get(0)?,
        status: parse_column(row, 1)?,
        transaction_hash: row.get(2)?,
        error: row.get(3)?,
        attempts: row.get(4)?,
        payload_json: row.get(5)?,
        requirements_json: row.get(6)?,
        updated_at: from_unix(row.get(7)?),
    })
}

fn is_busy(err: &Error) -> bool {
    matches!(
        err,
        Error::Database(rusqlite::Error::SqliteFailure(e, _))
            if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Run a ledger operation on the blocking pool.
pub(crate) async fn spawn_ledger<T, F>(ledger: &Arc<PayoutLedger>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&PayoutLedger) -> Result<T> + Send + 'static,
{
    let ledger = Arc::clone(ledger);
    tokio::task::spawn_blocking(move || f(&ledger))
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                Error::ShuttingDown
            } else {
                Error::LedgerConflict(format!("ledger task failed: {e}"))
            }
        })?
}

/// Random 128-bit identifier, hex encoded.
pub(crate) fn new_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}
