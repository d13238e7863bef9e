//! Escrow of creator shares: claim and sweep.
//!
//! Funds are never deleted. The `claimed_at` / `swept_at` columns are the
//! only guard, and every transition is an `UPDATE ... WHERE ... IS NULL`,
//! so concurrent claim and sweep runs settle on exactly one outcome per
//! fund.

use super::{
    fund_from_row, insert_entry, load_agent, load_entry, PayoutEntry, PayoutLedger, PayoutStatus,
    RecipientKind, UnclaimedFund, FUND_COLUMNS,
};
use crate::error::{Error, Result};
use crate::wallet::normalize_address;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

/// Result of a claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSummary {
    /// Funds converted by this call.
    pub funds_claimed: usize,
    /// Total converted in cents.
    pub amount_cents: u64,
    /// Entries now payable to the claiming wallet.
    pub entries: Vec<PayoutEntry>,
}

impl ClaimSummary {
    /// Nothing was claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.funds_claimed == 0
    }
}

/// Result of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Funds moved to the treasury by this call.
    pub funds_swept: usize,
    /// Total moved in cents.
    pub amount_cents: u64,
    /// Treasury entries appended.
    pub treasury_entries: Vec<PayoutEntry>,
}

impl SweepSummary {
    /// Nothing was swept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.funds_swept == 0
    }
}

impl PayoutLedger {
    /// Convert every open escrowed fund of `agent_id` into pending payout
    /// entries addressed to `wallet`.
    ///
    /// `wallet` must be the creator wallet registered for the agent through
    /// [`PayoutLedger::set_creator_wallet`]; any other destination is
    /// refused. A second call with no new accumulation is a no-op and
    /// returns an empty summary. Funds past `expires_at` but not yet swept
    /// are still claimable.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if `wallet` is malformed
    /// - [`Error::NotFound`] if the agent is unknown
    /// - [`Error::Ownership`] if `wallet` is not the registered creator wallet
    pub fn claim(&self, agent_id: &str, wallet: &str, now: DateTime<Utc>) -> Result<ClaimSummary> {
        let wallet = normalize_address(wallet)?;
        let summary = self.transact(|tx| {
            let agent = load_agent(tx, agent_id)?
                .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
            if agent.creator_wallet.as_deref() != Some(wallet.as_str()) {
                return Err(Error::Ownership(format!(
                    "{wallet} is not the registered creator wallet of {agent_id}"
                )));
            }
            claim_tx(tx, agent_id, &wallet, now)
        })?;
        if !summary.is_empty() {
            info!(
                agent_id,
                funds = summary.funds_claimed,
                amount_cents = summary.amount_cents,
                "Escrowed funds claimed"
            );
        }
        Ok(summary)
    }

    /// Move every open fund with `expires_at < now` to the treasury.
    ///
    /// Each fund produces exactly one pending treasury entry for its full
    /// amount. Runs one transaction per agent.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure. Agents swept before the
    /// failure stay swept.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let agents: Vec<String> = self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT agent_id FROM unclaimed_funds
                 WHERE expires_at < ?1 AND claimed_at IS NULL AND swept_at IS NULL",
            )?;
            let rows = stmt
                .query_map(params![now.timestamp()], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let treasury = self.settings().treasury_address.clone();
        let mut summary = SweepSummary::default();
        for agent_id in agents {
            let swept = self.transact(|tx| sweep_agent_tx(tx, &agent_id, treasury.as_deref(), now))?;
            summary.funds_swept += swept.funds_swept;
            summary.amount_cents += swept.amount_cents;
            summary.treasury_entries.extend(swept.treasury_entries);
        }

        if !summary.is_empty() {
            info!(
                funds = summary.funds_swept,
                amount_cents = summary.amount_cents,
                "Expired escrow swept to treasury"
            );
        }
        Ok(summary)
    }

    /// Every fund (open or not) recorded for an agent, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn unclaimed_funds_for_agent(&self, agent_id: &str) -> Result<Vec<UnclaimedFund>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FUND_COLUMNS} FROM unclaimed_funds WHERE agent_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![agent_id], fund_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Open (unclaimed, unswept) escrow balance of an agent in cents.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn unclaimed_balance(&self, agent_id: &str) -> Result<u64> {
        self.read(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(amount_cents), 0) FROM unclaimed_funds
                 WHERE agent_id = ?1 AND claimed_at IS NULL AND swept_at IS NULL",
                params![agent_id],
                |row| row.get(0),
            )?;
            Ok(total as u64)
        })
    }
}

fn open_funds(conn: &Connection, sql_filter: &str, args: impl rusqlite::Params) -> Result<Vec<UnclaimedFund>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FUND_COLUMNS} FROM unclaimed_funds
         WHERE claimed_at IS NULL AND swept_at IS NULL AND {sql_filter} ORDER BY id"
    ))?;
    let rows = stmt
        .query_map(args, fund_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Claim inside an open transaction. `wallet` must already be normalized.
pub(super) fn claim_tx(
    conn: &Connection,
    agent_id: &str,
    wallet: &str,
    now: DateTime<Utc>,
) -> Result<ClaimSummary> {
    let mut summary = ClaimSummary::default();

    for fund in open_funds(conn, "agent_id = ?1", params![agent_id])? {
        let marked = conn.execute(
            "UPDATE unclaimed_funds SET claimed_at = ?1
             WHERE id = ?2 AND claimed_at IS NULL AND swept_at IS NULL",
            params![now.timestamp(), fund.id],
        )?;
        if marked == 0 {
            continue;
        }

        let moved = conn.execute(
            "UPDATE payout_entries SET status = ?1, recipient_address = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                PayoutStatus::Pending.as_str(),
                wallet,
                fund.payout_entry_id,
                PayoutStatus::Escrowed.as_str()
            ],
        )?;
        if moved != 1 {
            return Err(Error::LedgerConflict(format!(
                "escrowed entry {} for fund {} is not in escrow",
                fund.payout_entry_id, fund.id
            )));
        }

        let entry = load_entry(conn, fund.payout_entry_id)?
            .ok_or_else(|| Error::NotFound(format!("payout entry {}", fund.payout_entry_id)))?;
        debug!(fund_id = fund.id, amount_cents = fund.amount_cents, "Fund claimed");
        summary.funds_claimed += 1;
        summary.amount_cents += fund.amount_cents;
        summary.entries.push(entry);
    }

    Ok(summary)
}

fn sweep_agent_tx(
    conn: &Connection,
    agent_id: &str,
    treasury: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SweepSummary> {
    let mut summary = SweepSummary::default();
    let expired = open_funds(
        conn,
        "agent_id = ?1 AND expires_at < ?2",
        params![agent_id, now.timestamp()],
    )?;

    for fund in expired {
        let marked = conn.execute(
            "UPDATE unclaimed_funds SET swept_at = ?1
             WHERE id = ?2 AND claimed_at IS NULL AND swept_at IS NULL",
            params![now.timestamp(), fund.id],
        )?;
        if marked == 0 {
            continue;
        }

        let escrowed = load_entry(conn, fund.payout_entry_id)?
            .ok_or_else(|| Error::NotFound(format!("payout entry {}", fund.payout_entry_id)))?;
        let moved = conn.execute(
            "UPDATE payout_entries SET status = ?1, resolved_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                PayoutStatus::Swept.as_str(),
                now.timestamp(),
                escrowed.id,
                PayoutStatus::Escrowed.as_str()
            ],
        )?;
        if moved != 1 {
            return Err(Error::LedgerConflict(format!(
                "escrowed entry {} for fund {} is not in escrow",
                escrowed.id, fund.id
            )));
        }

        let treasury_entry = insert_entry(
            conn,
            RecipientKind::Treasury,
            treasury,
            fund.amount_cents,
            PayoutStatus::Pending,
            &escrowed.subject_id,
            Some(agent_id),
            now,
        )?;
        debug!(fund_id = fund.id, amount_cents = fund.amount_cents, "Fund swept");
        summary.funds_swept += 1;
        summary.amount_cents += fund.amount_cents;
        summary.treasury_entries.push(treasury_entry);
    }

    Ok(summary)
}
