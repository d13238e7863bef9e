//! Payment requirements and the 402 challenge.

use crate::config::{Environment, TipjarConfig};
use crate::error::{Error, Result};
use crate::money::{chain_amount, format_usdc};
use crate::revenue::SplitPercentages;
use crate::wallet::normalize_address;
use serde::{Deserialize, Serialize};

/// Protocol version spoken by this service.
pub const X402_VERSION: u32 = 1;

/// The only supported scheme: a fixed-amount transfer authorization.
pub const SCHEME_EXACT: &str = "exact";

/// Placeholder `payTo` used in mock mode when no payee is configured.
pub const MOCK_PAYEE: &str = "0x0000000000000000000000000000000000000000";

/// Network and asset for a deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkProfile {
    /// x402 network name.
    pub network: &'static str,
    /// USDC contract address.
    pub asset: &'static str,
    /// EIP-712 domain name of the asset.
    pub asset_name: &'static str,
    /// EIP-712 domain version of the asset.
    pub asset_version: &'static str,
}

impl NetworkProfile {
    /// Base Sepolia USDC.
    pub const TESTNET: Self = Self {
        network: "base-sepolia",
        asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        asset_name: "USDC",
        asset_version: "2",
    };

    /// Base mainnet USDC.
    pub const MAINNET: Self = Self {
        network: "base",
        asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        asset_name: "USD Coin",
        asset_version: "2",
    };

    /// Profile for an environment.
    #[must_use]
    pub const fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Testnet => Self::TESTNET,
            Environment::Mainnet => Self::MAINNET,
        }
    }
}

/// EIP-712 domain hints for the asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetExtra {
    /// Domain name.
    pub name: String,
    /// Domain version.
    pub version: String,
}

/// What the payer must authorize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme (`exact`).
    pub scheme: String,
    /// Network name.
    pub network: String,
    /// Amount in asset micro-units, as an integer string.
    #[serde(alias = "maxAmountRequired")]
    pub amount: String,
    /// Asset contract address.
    pub asset: String,
    /// Receiving wallet.
    pub pay_to: String,
    /// Upper bound on facilitator processing time.
    pub max_timeout_seconds: u64,
    /// Resource being paid for.
    pub resource: String,
    /// Human-readable description.
    pub description: String,
    /// Response MIME type of the resource.
    pub mime_type: String,
    /// Asset domain hints.
    pub extra: AssetExtra,
}

/// `payment_details` block of the 402 body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Requested amount in cents.
    pub amount_cents: u64,
    /// Requested amount as an exact decimal, e.g. `"2.50"`.
    pub amount_usdc: String,
    /// Currency symbol.
    pub currency: String,
    /// Network name.
    pub network: String,
    /// Split percentages the tip will be divided by.
    pub splits: SplitPercentages,
}

/// Body of a `402 Payment Required` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequiredBody {
    /// Protocol version.
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    /// Why payment is required.
    pub error: String,
    /// Acceptable payment options.
    pub accepts: Vec<PaymentRequirements>,
    /// Display details.
    pub payment_details: PaymentDetails,
}

/// Builds [`PaymentRequirements`] from configuration. Pure.
#[derive(Debug, Clone)]
pub struct PaymentChallengeBuilder {
    profile: NetworkProfile,
    pay_to: String,
    max_timeout_seconds: u64,
    min_tip_cents: u64,
    splits: SplitPercentages,
}

impl PaymentChallengeBuilder {
    /// Create a builder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no payee address is configured and
    /// mock mode is off, or the payee address is malformed.
    pub fn new(config: &TipjarConfig) -> Result<Self> {
        let pay_to = match config.payment.payee_address.as_deref() {
            Some(addr) => normalize_address(addr)
                .map_err(|e| Error::Config(format!("invalid payee address: {e}")))?,
            None if config.payment.mock_mode => MOCK_PAYEE.to_string(),
            None => {
                return Err(Error::Config(
                    "no payee address configured and mock mode is disabled".to_string(),
                ))
            }
        };

        Ok(Self {
            profile: NetworkProfile::for_environment(config.environment),
            pay_to,
            max_timeout_seconds: config.payment.max_timeout_seconds,
            min_tip_cents: config.payment.min_tip_cents,
            splits: config.splits,
        })
    }

    /// Network profile in use.
    #[must_use]
    pub const fn profile(&self) -> NetworkProfile {
        self.profile
    }

    /// Configured minimum tip.
    #[must_use]
    pub const fn min_tip_cents(&self) -> u64 {
        self.min_tip_cents
    }

    /// Build requirements for `amount_cents` on `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TipBelowMinimum`] below the configured minimum.
    pub fn build(
        &self,
        resource: &str,
        amount_cents: u64,
        description: &str,
    ) -> Result<PaymentRequirements> {
        if amount_cents < self.min_tip_cents {
            return Err(Error::TipBelowMinimum {
                amount_cents,
                minimum_cents: self.min_tip_cents,
            });
        }

        Ok(PaymentRequirements {
            scheme: SCHEME_EXACT.to_string(),
            network: self.profile.network.to_string(),
            amount: chain_amount(amount_cents)?,
            asset: self.profile.asset.to_string(),
            pay_to: self.pay_to.clone(),
            max_timeout_seconds: self.max_timeout_seconds,
            resource: resource.to_string(),
            description: description.to_string(),
            mime_type: "application/json".to_string(),
            extra: AssetExtra {
                name: self.profile.asset_name.to_string(),
                version: self.profile.asset_version.to_string(),
            },
        })
    }

    /// Wrap requirements into a 402 body.
    #[must_use]
    pub fn payment_required(
        &self,
        requirements: PaymentRequirements,
        amount_cents: u64,
        error: &str,
    ) -> PaymentRequiredBody {
        PaymentRequiredBody {
            x402_version: X402_VERSION,
            error: error.to_string(),
            payment_details: PaymentDetails {
                amount_cents,
                amount_usdc: format_usdc(amount_cents),
                currency: "USDC".to_string(),
                network: requirements.network.clone(),
                splits: self.splits,
            },
            accepts: vec![requirements],
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::money::cents_to_micro_units;

    const PAYEE: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595916Da2";

    fn config() -> TipjarConfig {
        let mut config = TipjarConfig::default();
        config.payment.payee_address = Some(PAYEE.to_string());
        config
    }

    #[test]
    fn test_build_testnet_requirements() {
        let builder = PaymentChallengeBuilder::new(&config()).expect("builder");
        let req = builder
            .build("/voting/clips/c1/tip", 250, "Tip clip c1")
            .expect("requirements");

        assert_eq!(req.scheme, "exact");
        assert_eq!(req.network, "base-sepolia");
        assert_eq!(
            req.amount,
            cents_to_micro_units(250).expect("fits").to_string()
        );
        assert_eq!(req.amount, "2500000");
        assert_eq!(req.pay_to, PAYEE.to_lowercase());
        assert_eq!(req.max_timeout_seconds, 300);
        assert_eq!(req.extra.name, "USDC");
    }

    #[test]
    fn test_mainnet_profile() {
        let mut config = config();
        config.environment = Environment::Mainnet;
        let builder = PaymentChallengeBuilder::new(&config).expect("builder");
        let req = builder.build("/r", 100, "d").expect("requirements");
        assert_eq!(req.network, "base");
        assert_eq!(req.asset, NetworkProfile::MAINNET.asset);
    }

    #[test]
    fn test_below_minimum() {
        let builder = PaymentChallengeBuilder::new(&config()).expect("builder");
        assert!(matches!(
            builder.build("/r", 24, "d"),
            Err(Error::TipBelowMinimum {
                amount_cents: 24,
                minimum_cents: 25
            })
        ));
        // no maximum
        builder.build("/r", 10_000_000, "d").expect("large tip");
    }

    #[test]
    fn test_missing_payee() {
        assert!(matches!(
            PaymentChallengeBuilder::new(&TipjarConfig::default()),
            Err(Error::Config(_))
        ));

        let mut mock = TipjarConfig::default();
        mock.payment.mock_mode = true;
        let builder = PaymentChallengeBuilder::new(&mock).expect("mock builder");
        assert_eq!(builder.build("/r", 25, "d").expect("req").pay_to, MOCK_PAYEE);
    }

    #[test]
    fn test_payment_required_body_shape() {
        let builder = PaymentChallengeBuilder::new(&config()).expect("builder");
        let req = builder.build("/voting/clips/c1/tip", 250, "d").expect("req");
        let body = builder.payment_required(req, 250, "payment required");
        let json = serde_json::to_value(&body).expect("serialize");

        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["accepts"][0]["amount"], "2500000");
        assert_eq!(json["accepts"][0]["payTo"], PAYEE.to_lowercase());
        assert_eq!(json["accepts"][0]["maxTimeoutSeconds"], 300);
        assert_eq!(json["payment_details"]["amount_usdc"], "2.50");
        assert_eq!(json["payment_details"]["amount_cents"], 250);
        assert_eq!(json["payment_details"]["splits"]["creator_pct"], 80);
    }
}
