//! Row types stored in the payout ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Who a payout entry pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    /// The human creator behind an agent.
    Creator,
    /// The platform (payee wallet).
    Platform,
    /// The agent's own payout wallet.
    Agent,
    /// The treasury, receiver of swept escrow.
    Treasury,
}

impl RecipientKind {
    /// Storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Platform => "platform",
            Self::Agent => "agent",
            Self::Treasury => "treasury",
        }
    }
}

impl FromStr for RecipientKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator" => Ok(Self::Creator),
            "platform" => Ok(Self::Platform),
            "agent" => Ok(Self::Agent),
            "treasury" => Ok(Self::Treasury),
            other => Err(Error::Serialization(format!("unknown recipient kind: {other}"))),
        }
    }
}

/// Lifecycle of a payout entry.
///
/// ```text
/// escrowed ──claim──▶ pending ──▶ paid
///    │                   │
///    └──sweep──▶ swept   └──▶ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    /// Payable, awaiting payout processing.
    Pending,
    /// Creator share held until a creator wallet is registered.
    Escrowed,
    /// Transferred (or retained, for platform entries).
    Paid,
    /// Transfer attempted and failed.
    Failed,
    /// Escrow expired and moved to the treasury.
    Swept,
}

impl PayoutStatus {
    /// Storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Escrowed => "escrowed",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Swept => "swept",
        }
    }

    /// Whether `self → next` is an allowed forward transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Escrowed, Self::Pending | Self::Swept) | (Self::Pending, Self::Paid | Self::Failed)
        )
    }

    /// No further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Failed | Self::Swept)
    }
}

impl FromStr for PayoutStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "escrowed" => Ok(Self::Escrowed),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "swept" => Ok(Self::Swept),
            other => Err(Error::Serialization(format!("unknown payout status: {other}"))),
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the post-response settlement of a credited tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// Credited, settle not yet completed.
    Pending,
    /// Facilitator executed the transfer.
    Settled,
    /// Settle failed; awaiting reconciliation.
    Failed,
}

impl SettlementStatus {
    /// Storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SettlementStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "settled" => Ok(Self::Settled),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Serialization(format!("unknown settlement status: {other}"))),
        }
    }
}

/// A registered agent and its wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Agent identifier.
    pub id: String,
    /// The agent's own payout wallet (write-once).
    pub agent_wallet: Option<String>,
    /// The human creator's payout wallet (mutable behind proof-of-control).
    pub creator_wallet: Option<String>,
}

/// Vote and tip totals for one clip variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipVariant {
    /// Clip variant identifier.
    pub id: String,
    /// Agent that produced the clip's script.
    #[serde(skip)]
    pub agent_id: String,
    /// Number of credited tip votes.
    pub vote_count: u64,
    /// Sum of credited tips in cents.
    pub tip_total: u64,
}

/// A credited tip, doubling as a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipVote {
    /// Tip identifier.
    pub id: String,
    /// Voted clip variant.
    pub clip_variant_id: String,
    /// Payer wallet reported by the facilitator.
    pub payer_address: String,
    /// Tip amount in cents.
    pub amount_cents: u64,
    /// Replay guard key derived from the payment authorization.
    pub authorization_id: String,
    /// Credit time.
    pub created_at: DateTime<Utc>,
}

/// One payable (or escrowed) share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutEntry {
    /// Row id.
    pub id: i64,
    /// Beneficiary kind.
    pub recipient_kind: RecipientKind,
    /// Destination wallet, when known.
    pub recipient_address: Option<String>,
    /// Amount in cents.
    pub amount_cents: u64,
    /// Current status.
    pub status: PayoutStatus,
    /// Tip vote this share originates from.
    pub subject_id: String,
    /// Agent the share relates to (creator/agent/treasury entries).
    pub agent_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the entry reached a terminal state.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Transfer reference once paid.
    pub tx_reference: Option<String>,
    /// Failure reason once failed.
    pub failure_reason: Option<String>,
}

/// A creator share held in escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnclaimedFund {
    /// Row id.
    pub id: i64,
    /// Agent whose creator has no wallet.
    pub agent_id: String,
    /// The escrowed payout entry backing this fund.
    pub payout_entry_id: i64,
    /// Held amount in cents.
    pub amount_cents: u64,
    /// Escrow time.
    pub created_at: DateTime<Utc>,
    /// Fixed at creation from the escrow TTL.
    pub expires_at: DateTime<Utc>,
    /// Set when converted to a payable entry.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Set when moved to the treasury.
    pub swept_at: Option<DateTime<Utc>>,
}

impl UnclaimedFund {
    /// Neither claimed nor swept.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.claimed_at.is_none() && self.swept_at.is_none()
    }
}

/// Settlement record kept for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Tip vote being settled.
    pub tip_vote_id: String,
    /// Current status.
    pub status: SettlementStatus,
    /// On-chain transaction hash when settled.
    pub transaction_hash: Option<String>,
    /// Last error when failed.
    pub error: Option<String>,
    /// Settle attempts made so far.
    pub attempts: u32,
    /// Serialized payment payload, for retries.
    pub payload_json: String,
    /// Serialized payment requirements, for retries.
    pub requirements_json: String,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

/// Convert stored unix seconds.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
