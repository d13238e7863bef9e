//! x402 tip payments.
//!
//! A tip request either carries no payment (the caller gets a 402 challenge)
//! or carries an `X-PAYMENT` header that is verified by an external
//! facilitator before anything is written.
//!
//! # Flow
//!
//! ```text
//! Tip request
//!      │
//!      ▼
//! ┌─────────────────────┐
//! │ Decode X-PAYMENT    │── none ──▶ 402 + requirements
//! └─────────┬───────────┘
//!           ▼
//! ┌─────────────────────┐
//! │ Replay LRU          │── hit ───▶ 409 payment_already_used
//! └─────────┬───────────┘
//!           ▼
//! ┌─────────────────────┐
//! │ Facilitator verify  │── invalid ▶ 402, no ledger change
//! └─────────┬───────────┘
//!           ▼
//! ┌─────────────────────┐
//! │ Split + credit      │  one ledger transaction
//! └─────────┬───────────┘
//!           ▼
//!   200 to the tipper, settle in the background
//! ```

pub mod facilitator;
pub mod header;
pub mod replay;
pub mod requirements;
pub mod settlement;
pub mod workflow;

pub use facilitator::{
    BearerToken, CredentialProvider, Endpoint, Facilitator, HttpFacilitator, MockFacilitator,
    NoCredentials, SettleResult, VerifyResult,
};
pub use header::{decode_payment_header, encode_payment_header, PaymentPayload, PAYMENT_HEADER};
pub use replay::{ConsumedAuthorizations, ReplayStats};
pub use requirements::{
    NetworkProfile, PaymentChallengeBuilder, PaymentDetails, PaymentRequiredBody,
    PaymentRequirements, X402_VERSION,
};
pub use settlement::{ReconcileReport, SettlementOutcome, Settler};
pub use workflow::{
    PayoutSummary, TipOutcome, TipReceipt, TipRequest, TipSuccessBody, TipWorkflow,
};
