//! Configuration for x402-tipjar.
//!
//! The configuration is loaded once (TOML file, then CLI/env overrides),
//! validated with [`TipjarConfig::validate`], and then shared immutably with
//! the workflow, ledger, facilitator client and scheduler.

use crate::error::{Error, Result};
use crate::revenue::SplitPercentages;
use crate::wallet::is_valid_address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Deployment environment. Selects network and asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Base Sepolia test network.
    #[default]
    Testnet,
    /// Base mainnet.
    Mainnet,
}

impl Environment {
    /// Whether this is a production deployment.
    #[must_use]
    pub fn is_production(self) -> bool {
        matches!(self, Self::Mainnet)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipjarConfig {
    /// Deployment environment.
    #[serde(default)]
    pub environment: Environment,

    /// Payment challenge settings.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Facilitator connection settings.
    #[serde(default)]
    pub facilitator: FacilitatorConfig,

    /// Revenue split percentages.
    #[serde(default)]
    pub splits: SplitPercentages,

    /// Ledger and escrow settings.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Wallet ownership challenge settings.
    #[serde(default)]
    pub ownership: OwnershipConfig,

    /// Scheduled maintenance settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Payment challenge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Platform wallet that receives tips (`payTo`).
    #[serde(default)]
    pub payee_address: Option<String>,

    /// Minimum tip in cents.
    #[serde(default = "default_min_tip_cents")]
    pub min_tip_cents: u64,

    /// Facilitator call timeout and `maxTimeoutSeconds` advertised to payers.
    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,

    /// Accept payments through the mock facilitator. Never enable in production.
    #[serde(default)]
    pub mock_mode: bool,

    /// Capacity of the in-memory replay cache.
    #[serde(default = "default_replay_cache_capacity")]
    pub replay_cache_capacity: usize,
}

/// Facilitator connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilitatorConfig {
    /// Base URL; `/verify` and `/settle` are appended.
    #[serde(default = "default_facilitator_url")]
    pub url: String,

    /// API credential presented as a bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Days an unclaimed creator share waits before being swept.
    #[serde(default = "default_escrow_ttl_days")]
    pub escrow_ttl_days: u32,

    /// Wallet receiving swept funds.
    #[serde(default)]
    pub treasury_address: Option<String>,

    /// Attempts made when SQLite reports the database busy.
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
}

/// Wallet ownership challenge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipConfig {
    /// Lifetime of an issued nonce.
    #[serde(default = "default_nonce_ttl_seconds")]
    pub nonce_ttl_seconds: u64,
}

/// Scheduled maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minutes between maintenance cycles.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Shared secret guarding the internal trigger.
    #[serde(default)]
    pub internal_secret: Option<String>,

    /// Execute pending payouts during maintenance.
    #[serde(default)]
    pub process_payouts: bool,

    /// Maximum payout entries handled per cycle.
    #[serde(default = "default_payout_batch_size")]
    pub payout_batch_size: u32,

    /// Retry failed settlements during maintenance.
    #[serde(default = "default_true")]
    pub reconcile_settlements: bool,

    /// Maximum settle attempts per tip before it is left for manual review.
    #[serde(default = "default_max_settle_attempts")]
    pub max_settle_attempts: u32,
}

impl Default for TipjarConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            payment: PaymentConfig::default(),
            facilitator: FacilitatorConfig::default(),
            splits: SplitPercentages::default(),
            ledger: LedgerConfig::default(),
            ownership: OwnershipConfig::default(),
            scheduler: SchedulerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            payee_address: None,
            min_tip_cents: default_min_tip_cents(),
            max_timeout_seconds: default_max_timeout_seconds(),
            mock_mode: false,
            replay_cache_capacity: default_replay_cache_capacity(),
        }
    }
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            url: default_facilitator_url(),
            api_key: None,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            escrow_ttl_days: default_escrow_ttl_days(),
            treasury_address: None,
            busy_retries: default_busy_retries(),
        }
    }
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            nonce_ttl_seconds: default_nonce_ttl_seconds(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            internal_secret: None,
            process_payouts: false,
            payout_batch_size: default_payout_batch_size(),
            reconcile_settlements: true,
            max_settle_attempts: default_max_settle_attempts(),
        }
    }
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "x402-tipjar")
        .map(|dirs| dirs.data_dir().join("ledger.db"))
        .unwrap_or_else(|| PathBuf::from(".tipjar/ledger.db"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_facilitator_url() -> String {
    "https://x402.org/facilitator".to_string()
}

const fn default_min_tip_cents() -> u64 {
    25
}

const fn default_max_timeout_seconds() -> u64 {
    300
}

const fn default_replay_cache_capacity() -> usize {
    100_000
}

const fn default_escrow_ttl_days() -> u32 {
    30
}

const fn default_busy_retries() -> u32 {
    5
}

const fn default_nonce_ttl_seconds() -> u64 {
    600
}

const fn default_interval_minutes() -> u64 {
    60
}

const fn default_payout_batch_size() -> u32 {
    100
}

const fn default_max_settle_attempts() -> u32 {
    5
}

const fn default_true() -> bool {
    true
}

impl TipjarConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Boot-time validation. Any failure here is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when split percentages don't sum to 100,
    /// no payee wallet is configured outside mock mode, a production
    /// deployment lacks facilitator credentials outside mock mode, an
    /// address is malformed, or a TTL/timeout is zero.
    pub fn validate(&self) -> Result<()> {
        self.splits.validate()?;

        if !self.splits.is_default() {
            warn!(
                "Non-default revenue split in use: creator={} platform={} agent={}",
                self.splits.creator_pct, self.splits.platform_pct, self.splits.agent_pct
            );
        }

        match self.payment.payee_address.as_deref() {
            Some(addr) if !is_valid_address(addr) => {
                return Err(Error::Config(format!("invalid payee address: {addr}")));
            }
            None if !self.payment.mock_mode => {
                return Err(Error::Config(
                    "payment.payee_address is required unless mock mode is enabled".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(addr) = self.ledger.treasury_address.as_deref() {
            if !is_valid_address(addr) {
                return Err(Error::Config(format!("invalid treasury address: {addr}")));
            }
        }

        let has_credentials = self
            .facilitator
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if self.environment.is_production() && !has_credentials && !self.payment.mock_mode {
            return Err(Error::Config(
                "mainnet requires facilitator.api_key unless mock mode is enabled".to_string(),
            ));
        }

        if self.payment.mock_mode {
            warn!("Mock payment mode enabled - payments are NOT verified by a facilitator");
        }

        if self.payment.max_timeout_seconds == 0 {
            return Err(Error::Config("payment.max_timeout_seconds must be > 0".to_string()));
        }
        if self.ledger.escrow_ttl_days == 0 {
            return Err(Error::Config("ledger.escrow_ttl_days must be > 0".to_string()));
        }
        if self.ownership.nonce_ttl_seconds == 0 {
            return Err(Error::Config("ownership.nonce_ttl_seconds must be > 0".to_string()));
        }
        if self.scheduler.interval_minutes == 0 {
            return Err(Error::Config("scheduler.interval_minutes must be > 0".to_string()));
        }

        Ok(())
    }

    /// Escrow lifetime as a chrono duration.
    #[must_use]
    pub fn escrow_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ledger.escrow_ttl_days))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    const PAYEE: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595916Da2";

    fn valid_config() -> TipjarConfig {
        let mut config = TipjarConfig::default();
        config.payment.payee_address = Some(PAYEE.to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = TipjarConfig::default();
        assert_eq!(config.environment, Environment::Testnet);
        assert_eq!(config.payment.min_tip_cents, 25);
        assert_eq!(config.payment.max_timeout_seconds, 300);
        assert_eq!(config.ledger.escrow_ttl_days, 30);
        assert!(config.splits.is_default());
        assert_eq!(config.log_level, "info");

        let parsed: TipjarConfig = toml::from_str("").expect("empty toml");
        assert_eq!(parsed.log_level, config.log_level);
    }

    #[test]
    fn test_valid_config_passes() {
        valid_config().validate().expect("valid");
    }

    #[test]
    fn test_missing_payee_fails_without_mock() {
        let config = TipjarConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut mock = TipjarConfig::default();
        mock.payment.mock_mode = true;
        mock.validate().expect("mock mode tolerates missing payee");
    }

    #[test]
    fn test_bad_split_fails() {
        let mut config = valid_config();
        config.splits = SplitPercentages {
            creator_pct: 80,
            platform_pct: 30,
            agent_pct: 1,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mainnet_requires_credentials() {
        let mut config = valid_config();
        config.environment = Environment::Mainnet;
        assert!(config.validate().is_err());

        config.facilitator.api_key = Some("secret".to_string());
        config.validate().expect("credentials present");

        config.facilitator.api_key = None;
        config.payment.mock_mode = true;
        config.validate().expect("mock mode explicitly set");
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        let mut config = valid_config();
        config.payment.payee_address = Some("not-an-address".to_string());
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.ledger.treasury_address = Some("0x123".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tipjar.toml");

        let mut config = valid_config();
        config.splits = SplitPercentages {
            creator_pct: 69,
            platform_pct: 30,
            agent_pct: 1,
        };
        config.to_file(&path).expect("write");

        let loaded = TipjarConfig::from_file(&path).expect("read");
        assert_eq!(loaded.splits, config.splits);
        assert_eq!(loaded.payment.payee_address.as_deref(), Some(PAYEE));
        loaded.validate().expect("still valid");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TipjarConfig = toml::from_str(
            r#"
            environment = "mainnet"

            [payment]
            payee_address = "0x742d35Cc6634C0532925a3b844Bc9e7595916Da2"
            min_tip_cents = 100
            "#,
        )
        .expect("parse");
        assert_eq!(config.environment, Environment::Mainnet);
        assert_eq!(config.payment.min_tip_cents, 100);
        assert_eq!(config.payment.max_timeout_seconds, 300);
        assert_eq!(config.ledger.escrow_ttl_days, 30);
    }
}
