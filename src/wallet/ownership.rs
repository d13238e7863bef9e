//! Proof-of-control for payout wallet changes.
//!
//! Changing where payouts go is the one ledger-affecting operation that no
//! facilitator verifies, so it requires a signature from the wallet itself.
//! The flow is:
//!
//! 1. [`WalletOwnershipChallenge::generate_nonce`] issues a short-lived,
//!    single-use nonce embedded in a canonical message and persists it.
//! 2. The wallet owner signs the message with `personal_sign` (EIP-191).
//! 3. [`WalletOwnershipChallenge::verify`] recovers the signer, checks the
//!    nonce is unexpired and unconsumed, consumes it, and returns an
//!    [`OwnershipProof`] that the ledger's wallet operations require.

use super::{normalize_address, parse_wallet_address, WalletAddress};
use crate::config::OwnershipConfig;
use crate::error::{Error, Result};
use crate::ledger::PayoutLedger;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// First line of every challenge message.
pub const MESSAGE_TITLE: &str = "x402-tipjar wallet ownership";

/// Upper bound on a nonce lifetime (one week).
const MAX_NONCE_TTL_SECS: i64 = 7 * 24 * 3600;

/// Length of an EVM recoverable signature (r || s || v).
pub const SIGNATURE_SIZE: usize = 65;

/// Wallet change being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletOperation {
    /// Register or replace an agent's creator wallet.
    SetCreatorWallet,
    /// Remove an agent's creator wallet.
    ClearCreatorWallet,
    /// Replace an agent's otherwise write-once payout wallet.
    ReregisterAgentWallet,
}

impl WalletOperation {
    /// Canonical form used in messages and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetCreatorWallet => "set_creator_wallet",
            Self::ClearCreatorWallet => "clear_creator_wallet",
            Self::ReregisterAgentWallet => "reregister_agent_wallet",
        }
    }
}

impl fmt::Display for WalletOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "set_creator_wallet" => Ok(Self::SetCreatorWallet),
            "clear_creator_wallet" => Ok(Self::ClearCreatorWallet),
            "reregister_agent_wallet" => Ok(Self::ReregisterAgentWallet),
            other => Err(Error::Ownership(format!("unknown wallet operation: {other}"))),
        }
    }
}

/// An issued challenge, returned to the wallet owner for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletChallenge {
    /// Single-use nonce (hex).
    pub nonce: String,
    /// Canonical message to sign.
    pub message: String,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// Nonce expiry.
    pub expires_at: DateTime<Utc>,
}

/// Evidence that the holder of `wallet` authorized `operation` on `subject`.
///
/// Only [`WalletOwnershipChallenge::verify`] can produce one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipProof {
    subject: String,
    wallet: WalletAddress,
    operation: WalletOperation,
}

impl OwnershipProof {
    /// Subject (agent id) the proof is bound to.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Wallet whose key signed the challenge.
    #[must_use]
    pub const fn wallet(&self) -> WalletAddress {
        self.wallet
    }

    /// Authorized operation.
    #[must_use]
    pub const fn operation(&self) -> WalletOperation {
        self.operation
    }

    #[cfg(test)]
    #[allow(clippy::expect_used)]
    pub(crate) fn issued(subject: &str, wallet: &str, operation: WalletOperation) -> Self {
        Self {
            subject: subject.to_string(),
            wallet: wallet.parse().expect("test wallet"),
            operation,
        }
    }

    /// Fail unless this proof authorizes `operation` on `subject`.
    pub(crate) fn ensure(&self, subject: &str, operation: WalletOperation) -> Result<()> {
        if self.subject != subject {
            return Err(Error::Ownership(format!(
                "proof is bound to {}, not {subject}",
                self.subject
            )));
        }
        if self.operation != operation {
            return Err(Error::Ownership(format!(
                "proof authorizes {}, not {operation}",
                self.operation
            )));
        }
        Ok(())
    }
}

/// Issues and verifies wallet ownership challenges.
///
/// Nonces live in the ledger database so single use holds across restarts.
pub struct WalletOwnershipChallenge {
    ledger: Arc<PayoutLedger>,
    nonce_ttl: Duration,
}

impl WalletOwnershipChallenge {
    /// Create a challenge service backed by `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<PayoutLedger>, config: &OwnershipConfig) -> Self {
        let ttl_secs = i64::try_from(config.nonce_ttl_seconds)
            .unwrap_or(MAX_NONCE_TTL_SECS)
            .min(MAX_NONCE_TTL_SECS);
        Self {
            ledger,
            nonce_ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Issue a nonce and canonical message for `wallet_address` to sign.
    ///
    /// # Errors
    ///
    /// Returns an error if the wallet is malformed or the nonce cannot be
    /// persisted.
    pub fn generate_nonce(
        &self,
        subject: &str,
        wallet_address: &str,
        operation: WalletOperation,
        now: DateTime<Utc>,
    ) -> Result<WalletChallenge> {
        let wallet = normalize_address(wallet_address)?;
        let nonce_bytes: [u8; 16] = rand::thread_rng().gen();
        let nonce = hex::encode(nonce_bytes);
        let issued_at = now;
        let expires_at = now + self.nonce_ttl;
        let message = canonical_message(operation, subject, &wallet, &nonce, issued_at, expires_at);

        self.ledger.transact(|tx| {
            tx.execute(
                "INSERT INTO wallet_challenges
                    (nonce, subject, wallet_address, operation, message, issued_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    nonce,
                    subject,
                    wallet,
                    operation.as_str(),
                    message,
                    issued_at.timestamp(),
                    expires_at.timestamp()
                ],
            )?;
            Ok(())
        })?;

        debug!(subject, %operation, "Issued wallet ownership challenge");
        Ok(WalletChallenge {
            nonce,
            message,
            issued_at,
            expires_at,
        })
    }

    /// Verify a signed challenge and consume its nonce.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ownership`] if the message was not issued for
    /// `subject`, the nonce is expired or already used, or the signature
    /// does not recover to the challenged wallet. Returns [`Error::Crypto`]
    /// for a malformed signature.
    pub fn verify(
        &self,
        subject: &str,
        signature: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<OwnershipProof> {
        let nonce = message_field(message, "Nonce")
            .ok_or_else(|| Error::Ownership("message carries no nonce".to_string()))?
            .to_string();
        let signer = recover_signer(message.as_bytes(), signature)?;

        let proof = self.ledger.transact(|tx| {
            let row: Option<(String, String, String, String, i64, Option<i64>)> = tx
                .query_row(
                    "SELECT subject, wallet_address, operation, message, expires_at, consumed_at
                     FROM wallet_challenges WHERE nonce = ?1",
                    params![nonce],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    },
                )
                .optional()?;
            let (stored_subject, stored_wallet, operation, stored_message, expires_at, consumed_at) =
                row.ok_or_else(|| Error::Ownership("unknown nonce".to_string()))?;

            if stored_subject != subject || stored_message != message {
                return Err(Error::Ownership("challenge does not match subject".to_string()));
            }
            if consumed_at.is_some() {
                return Err(Error::Ownership("nonce already used".to_string()));
            }
            if expires_at < now.timestamp() {
                return Err(Error::Ownership("nonce expired".to_string()));
            }

            let expected = parse_wallet_address(&stored_wallet)?;
            if signer != expected {
                return Err(Error::Ownership(format!(
                    "signature recovers to {signer}, expected {expected}"
                )));
            }

            let consumed = tx.execute(
                "UPDATE wallet_challenges SET consumed_at = ?1
                 WHERE nonce = ?2 AND consumed_at IS NULL",
                params![now.timestamp(), nonce],
            )?;
            if consumed != 1 {
                return Err(Error::Ownership("nonce already used".to_string()));
            }

            Ok(OwnershipProof {
                subject: stored_subject,
                wallet: expected,
                operation: operation.parse()?,
            })
        });

        match &proof {
            Ok(p) => info!(subject, wallet = %p.wallet, operation = %p.operation, "Wallet ownership verified"),
            Err(e) => warn!(subject, "Wallet ownership verification failed: {e}"),
        }
        proof
    }

    /// Delete challenges that expired before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.ledger.purge_wallet_challenges(cutoff)
    }
}

impl PayoutLedger {
    /// Delete ownership challenges that expired before `cutoff`, consumed
    /// or not.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn purge_wallet_challenges(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.transact(|tx| {
            Ok(tx.execute(
                "DELETE FROM wallet_challenges WHERE expires_at < ?1",
                params![cutoff.timestamp()],
            )?)
        })
    }
}

fn canonical_message(
    operation: WalletOperation,
    subject: &str,
    wallet: &str,
    nonce: &str,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> String {
    format!(
        "{MESSAGE_TITLE}\n\
         Operation: {operation}\n\
         Subject: {subject}\n\
         Wallet: {wallet}\n\
         Nonce: {nonce}\n\
         Issued At: {}\n\
         Expires At: {}",
        issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

fn message_field<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    message.lines().find_map(|line| {
        line.strip_prefix(name)
            .and_then(|rest| rest.strip_prefix(": "))
            .map(str::trim)
    })
}

/// EIP-191 `personal_sign` digest of `message`.
#[must_use]
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// EVM address of a secp256k1 public key.
#[must_use]
pub fn address_from_verifying_key(key: &VerifyingKey) -> WalletAddress {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    WalletAddress::new(address)
}

/// Recover the wallet that `personal_sign`ed `message`.
///
/// `signature` is 65 bytes `r || s || v` in hex (with or without `0x`),
/// `v` being 27/28 or 0/1.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the signature is malformed or no key can be
/// recovered.
pub fn recover_signer(message: &[u8], signature: &str) -> Result<WalletAddress> {
    let hex_sig = signature
        .strip_prefix("0x")
        .or_else(|| signature.strip_prefix("0X"))
        .unwrap_or(signature);
    let bytes =
        hex::decode(hex_sig).map_err(|e| Error::Crypto(format!("signature is not hex: {e}")))?;
    if bytes.len() != SIGNATURE_SIZE {
        return Err(Error::Crypto(format!(
            "expected {SIGNATURE_SIZE} signature bytes, got {}",
            bytes.len()
        )));
    }

    let v = match bytes[64] {
        v @ (27 | 28) => v - 27,
        v @ (0 | 1) => v,
        other => return Err(Error::Crypto(format!("invalid recovery byte {other}"))),
    };
    let mut signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| Error::Crypto(format!("invalid signature: {e}")))?;
    let mut recovery_id =
        RecoveryId::from_byte(v).ok_or_else(|| Error::Crypto("invalid recovery id".to_string()))?;
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let digest = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|e| Error::Crypto(format!("signature recovery failed: {e}")))?;
    Ok(address_from_verifying_key(&key))
}
