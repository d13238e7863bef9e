//! tipjar-node entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use x402_tipjar::ledger::MockPayoutExecutor;
use x402_tipjar::payment::{Facilitator, HttpFacilitator, MockFacilitator, Settler};
use x402_tipjar::{MaintenanceBuilder, PayoutLedger};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("tipjar-node v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.to_config()?;
    config.validate()?;
    let config = Arc::new(config);

    let ledger = Arc::new(PayoutLedger::from_config(&config)?);
    let timeout = Duration::from_secs(config.payment.max_timeout_seconds);
    let facilitator: Arc<dyn Facilitator> = if config.payment.mock_mode {
        Arc::new(MockFacilitator::new())
    } else {
        Arc::new(HttpFacilitator::new(&config.facilitator, timeout)?)
    };

    let mut builder = MaintenanceBuilder::new(Arc::clone(&config), Arc::clone(&ledger))
        .with_settler(Settler::new(facilitator, Arc::clone(&ledger), timeout, None));
    // On-chain payout execution is external; mock mode records mock transfers.
    if config.payment.mock_mode {
        builder = builder.with_executor(Arc::new(MockPayoutExecutor::new()));
    }
    let mut service = builder.build();

    if cli.once {
        let report = service.run_once().await?;
        info!(
            funds_swept = report.funds_swept,
            swept_cents = report.swept_cents,
            challenges_purged = report.challenges_purged,
            "Maintenance cycle complete"
        );
        return Ok(());
    }

    service.run().await?;

    info!("Goodbye!");
    Ok(())
}
