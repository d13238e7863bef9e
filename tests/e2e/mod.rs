//! End-to-end tests for x402-tipjar.
//!
//! Every test drives the public API against an in-memory ledger and a
//! scripted facilitator, so no network access is needed.
//!
//! ```bash
//! cargo test --test e2e
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod harness;
mod concurrency;
mod escrow;
mod ownership;
mod tip_flow;

