//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use x402_tipjar::config::{Environment, TipjarConfig};

/// x402 tip ledger maintenance node.
#[derive(Parser, Debug)]
#[command(name = "tipjar-node")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// SQLite ledger file.
    #[arg(long, env = "TIPJAR_DATABASE")]
    pub database: Option<PathBuf>,

    /// Deployment environment.
    #[arg(long, value_enum, env = "TIPJAR_ENVIRONMENT")]
    pub environment: Option<CliEnvironment>,

    /// Accept payments through the mock facilitator.
    #[arg(long, env = "TIPJAR_MOCK_PAYMENTS")]
    pub mock: bool,

    /// Facilitator base URL.
    #[arg(long, env = "TIPJAR_FACILITATOR_URL")]
    pub facilitator_url: Option<String>,

    /// Facilitator API key.
    #[arg(long, env = "TIPJAR_FACILITATOR_API_KEY", hide_env_values = true)]
    pub facilitator_api_key: Option<String>,

    /// Shared secret for the internal maintenance trigger.
    #[arg(long, env = "TIPJAR_INTERNAL_SECRET", hide_env_values = true)]
    pub internal_secret: Option<String>,

    /// Run one maintenance cycle and exit.
    #[arg(long)]
    pub once: bool,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "TIPJAR_LOG_JSON")]
    pub log_json: bool,
}

/// Environment CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliEnvironment {
    /// Base Sepolia.
    Testnet,
    /// Base mainnet.
    Mainnet,
}

impl Cli {
    /// Convert CLI arguments into a [`TipjarConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn to_config(&self) -> color_eyre::Result<TipjarConfig> {
        let mut config = if let Some(ref path) = self.config {
            TipjarConfig::from_file(path)?
        } else {
            TipjarConfig::default()
        };

        if let Some(ref database) = self.database {
            config.ledger.database_path.clone_from(database);
        }
        if let Some(environment) = self.environment {
            config.environment = environment.into();
        }
        if self.mock {
            config.payment.mock_mode = true;
        }
        if let Some(ref url) = self.facilitator_url {
            config.facilitator.url.clone_from(url);
        }
        if self.facilitator_api_key.is_some() {
            config.facilitator.api_key.clone_from(&self.facilitator_api_key);
        }
        if self.internal_secret.is_some() {
            config.scheduler.internal_secret.clone_from(&self.internal_secret);
        }
        config.log_level.clone_from(&self.log_level);

        Ok(config)
    }
}

impl From<CliEnvironment> for Environment {
    fn from(e: CliEnvironment) -> Self {
        match e {
            CliEnvironment::Testnet => Self::Testnet,
            CliEnvironment::Mainnet => Self::Mainnet,
        }
    }
}
