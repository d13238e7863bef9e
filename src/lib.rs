//! # x402-tipjar
//!
//! Tip payments for generated video clips over the x402 protocol.
//!
//! A tip is verified by an external facilitator, split to the cent between
//! creator, platform and agent, and credited in one durable ledger
//! transaction. Creator shares without a wallet wait in escrow until the
//! creator proves control of a wallet, or are swept to the treasury once
//! they expire.
//!
//! ## Modules
//!
//! - [`payment`]: 402 challenges, facilitator client, replay guard, tip workflow
//! - [`revenue`]: exact-cents three way split
//! - [`ledger`]: SQLite payout ledger with escrow, claim and sweep
//! - [`wallet`]: address handling and wallet ownership challenges
//! - [`scheduler`]: periodic payouts, sweep and settlement reconciliation
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use x402_tipjar::{MockFacilitator, PayoutLedger, TipjarConfig, TipRequest, TipWorkflow};
//!
//! let mut config = TipjarConfig::default();
//! config.payment.mock_mode = true;
//! let ledger = Arc::new(PayoutLedger::from_config(&config)?);
//! let workflow = TipWorkflow::new(&config, ledger, Arc::new(MockFacilitator::new()))?;
//! let outcome = workflow
//!     .handle_tip(TipRequest {
//!         clip_variant_id: "clip-1".to_string(),
//!         amount_cents: 250,
//!         payment_header: None,
//!     })
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod revenue;
pub mod scheduler;
pub mod wallet;

pub use config::{Environment, TipjarConfig};
pub use error::{Error, Result};
pub use event::{ServiceEvent, ServiceEventsChannel, ServiceEventsSender};
pub use ledger::{LedgerSettings, PayoutLedger};
pub use payment::{
    Facilitator, HttpFacilitator, MockFacilitator, TipOutcome, TipRequest, TipWorkflow,
};
pub use revenue::{split, RevenueSplit, SplitPercentages};
pub use scheduler::{InternalTrigger, MaintenanceBuilder, MaintenanceReport, RunningMaintenance};
pub use wallet::{WalletOperation, WalletOwnershipChallenge};
