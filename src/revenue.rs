//! Revenue split arithmetic.
//!
//! Each tip is divided among three beneficiaries:
//!
//! - **Creator**: the human behind the agent that wrote the clip's script
//! - **Platform**: retains its share in the payee wallet
//! - **Agent**: the agent's own payout wallet
//!
//! The creator and agent shares are floored; the platform share absorbs the
//! remainder so the three parts always sum exactly to the tipped amount.
//! The percentage triple is deployment configuration, validated once at boot.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Split triple most deployments run with.
pub const DEFAULT_CREATOR_PCT: u8 = 80;
/// Default platform share percentage.
pub const DEFAULT_PLATFORM_PCT: u8 = 19;
/// Default agent share percentage.
pub const DEFAULT_AGENT_PCT: u8 = 1;

/// Percentage triple for revenue splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPercentages {
    /// Creator share percentage.
    pub creator_pct: u8,
    /// Platform share percentage.
    pub platform_pct: u8,
    /// Agent share percentage.
    pub agent_pct: u8,
}

impl Default for SplitPercentages {
    fn default() -> Self {
        Self {
            creator_pct: DEFAULT_CREATOR_PCT,
            platform_pct: DEFAULT_PLATFORM_PCT,
            agent_pct: DEFAULT_AGENT_PCT,
        }
    }
}

impl SplitPercentages {
    /// Create a validated percentage triple.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the percentages do not sum to 100.
    pub fn new(creator_pct: u8, platform_pct: u8, agent_pct: u8) -> Result<Self> {
        let pct = Self {
            creator_pct,
            platform_pct,
            agent_pct,
        };
        pct.validate()?;
        Ok(pct)
    }

    /// Check that the triple sums to exactly 100.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the percentages do not sum to 100.
    pub fn validate(&self) -> Result<()> {
        let total =
            u16::from(self.creator_pct) + u16::from(self.platform_pct) + u16::from(self.agent_pct);
        if total != 100 {
            return Err(Error::Config(format!(
                "split percentages must sum to 100, got {total} ({}/{}/{})",
                self.creator_pct, self.platform_pct, self.agent_pct
            )));
        }
        Ok(())
    }

    /// Whether this is the commonly deployed default triple.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Result of splitting one amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSplit {
    /// Creator share in cents.
    pub creator_cents: u64,
    /// Platform share in cents (includes the rounding remainder).
    pub platform_cents: u64,
    /// Agent share in cents.
    pub agent_cents: u64,
}

impl RevenueSplit {
    /// Sum of all three shares.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.creator_cents + self.platform_cents + self.agent_cents
    }
}

/// Split `amount_cents` according to `pct`.
///
/// `pct` is expected to have passed [`SplitPercentages::validate`]; callers
/// obtain it from a validated configuration.
#[must_use]
pub fn split(amount_cents: u64, pct: &SplitPercentages) -> RevenueSplit {
    let share = |p: u8| -> u64 {
        // u128 keeps amount * pct from overflowing for any u64 amount
        let cents = u128::from(amount_cents) * u128::from(p) / 100;
        u64::try_from(cents).unwrap_or(amount_cents)
    };

    let creator_cents = share(pct.creator_pct).min(amount_cents);
    let agent_cents = share(pct.agent_pct).min(amount_cents - creator_cents);
    let platform_cents = amount_cents - creator_cents - agent_cents;

    RevenueSplit {
        creator_cents,
        platform_cents,
        agent_cents,
    }
}
