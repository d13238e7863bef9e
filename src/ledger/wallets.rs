//! Agent and creator wallet registry.
//!
//! The agent wallet is write-once; only [`PayoutLedger::reregister_agent_wallet`]
//! with an [`OwnershipProof`] replaces it. Every creator wallet change needs
//! a proof, and a registered creator wallet is only replaced after the
//! current holder clears it.

use super::escrow::{claim_tx, ClaimSummary};
use super::{load_agent, PayoutLedger};
use crate::error::{Error, Result};
use crate::wallet::{normalize_address, OwnershipProof, WalletOperation};
use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::info;

impl PayoutLedger {
    /// Register the agent's own payout wallet.
    ///
    /// Setting the same wallet again is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the agent is unknown
    /// - [`Error::WalletImmutable`] if a different wallet is already set
    /// - [`Error::InvalidAddress`] if `wallet` is malformed
    pub fn set_agent_wallet(&self, agent_id: &str, wallet: &str, now: DateTime<Utc>) -> Result<()> {
        let wallet = normalize_address(wallet)?;
        self.transact(|tx| {
            let agent = load_agent(tx, agent_id)?
                .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
            match agent.agent_wallet.as_deref() {
                Some(existing) if existing == wallet => Ok(()),
                Some(_) => Err(Error::WalletImmutable {
                    agent_id: agent_id.to_string(),
                }),
                None => {
                    tx.execute(
                        "UPDATE agents SET agent_wallet = ?1, updated_at = ?2
                         WHERE id = ?3 AND agent_wallet IS NULL",
                        params![wallet, now.timestamp(), agent_id],
                    )?;
                    info!(agent_id, %wallet, "Agent wallet registered");
                    Ok(())
                }
            }
        })
    }

    /// Replace the agent's payout wallet with the wallet proven in `proof`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ownership`] unless the proof authorizes
    /// [`WalletOperation::ReregisterAgentWallet`] for `agent_id`, and
    /// [`Error::NotFound`] if the agent is unknown.
    pub fn reregister_agent_wallet(
        &self,
        agent_id: &str,
        proof: &OwnershipProof,
        now: DateTime<Utc>,
    ) -> Result<()> {
        proof.ensure(agent_id, WalletOperation::ReregisterAgentWallet)?;
        let wallet = proof.wallet().to_string();
        self.transact(|tx| {
            let updated = tx.execute(
                "UPDATE agents SET agent_wallet = ?1, updated_at = ?2 WHERE id = ?3",
                params![wallet, now.timestamp(), agent_id],
            )?;
            if updated == 0 {
                return Err(Error::NotFound(format!("agent {agent_id}")));
            }
            Ok(())
        })?;
        info!(agent_id, %wallet, "Agent wallet re-registered");
        Ok(())
    }

    /// Set the creator wallet proven in `proof` and claim any open escrow
    /// for the agent into it, in one transaction.
    ///
    /// Proving the already registered wallet again only claims.
    ///
    /// # Errors
    ///
    /// - [`Error::Ownership`] unless the proof authorizes
    ///   [`WalletOperation::SetCreatorWallet`] for `agent_id`, or if a
    ///   different creator wallet is registered (it must be cleared first)
    /// - [`Error::NotFound`] if the agent is unknown
    pub fn set_creator_wallet(
        &self,
        agent_id: &str,
        proof: &OwnershipProof,
        now: DateTime<Utc>,
    ) -> Result<ClaimSummary> {
        proof.ensure(agent_id, WalletOperation::SetCreatorWallet)?;
        let wallet = proof.wallet().to_string();
        let claimed = self.transact(|tx| {
            let agent = load_agent(tx, agent_id)?
                .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
            match agent.creator_wallet.as_deref() {
                Some(existing) if existing == wallet => {}
                Some(_) => {
                    return Err(Error::Ownership(
                        "a different creator wallet is registered; clear it first".to_string(),
                    ));
                }
                None => {
                    tx.execute(
                        "UPDATE agents SET creator_wallet = ?1, updated_at = ?2
                         WHERE id = ?3 AND creator_wallet IS NULL",
                        params![wallet, now.timestamp(), agent_id],
                    )?;
                }
            }
            claim_tx(tx, agent_id, &wallet, now)
        })?;
        info!(
            agent_id,
            %wallet,
            claimed_cents = claimed.amount_cents,
            "Creator wallet set"
        );
        Ok(claimed)
    }

    /// Remove the creator wallet. The proof must come from the wallet
    /// currently registered; later creator shares are escrowed again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ownership`] unless the proof authorizes
    /// [`WalletOperation::ClearCreatorWallet`] for `agent_id` and was signed
    /// by the registered creator wallet.
    pub fn clear_creator_wallet(
        &self,
        agent_id: &str,
        proof: &OwnershipProof,
        now: DateTime<Utc>,
    ) -> Result<()> {
        proof.ensure(agent_id, WalletOperation::ClearCreatorWallet)?;
        let wallet = proof.wallet().to_string();
        self.transact(|tx| {
            let agent = load_agent(tx, agent_id)?
                .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
            if agent.creator_wallet.as_deref() != Some(wallet.as_str()) {
                return Err(Error::Ownership(
                    "proof was not signed by the registered creator wallet".to_string(),
                ));
            }
            tx.execute(
                "UPDATE agents SET creator_wallet = NULL, updated_at = ?1 WHERE id = ?2",
                params![now.timestamp(), agent_id],
            )?;
            Ok(())
        })?;
        info!(agent_id, "Creator wallet cleared");
        Ok(())
    }
}
