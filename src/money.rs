//! Exact conversion between USD cents and 6-decimal USDC micro-units.
//!
//! Amounts are always integers. One cent is `10_000` micro-units, so the
//! conversion is lossless in the cents → micro-units direction and the
//! inverse truncates sub-cent dust.

use crate::error::{Error, Result};

/// Micro-units (6 decimals) per cent.
pub const MICRO_UNITS_PER_CENT: u64 = 10_000;

/// Convert cents to on-chain micro-units.
///
/// # Errors
///
/// Returns an error if the result would overflow `u64`.
pub fn cents_to_micro_units(cents: u64) -> Result<u64> {
    cents
        .checked_mul(MICRO_UNITS_PER_CENT)
        .ok_or_else(|| Error::Serialization(format!("{cents} cents overflows micro-units")))
}

/// Convert micro-units back to cents, dropping any sub-cent remainder.
#[must_use]
pub fn micro_units_to_cents(micro_units: u64) -> u64 {
    micro_units / MICRO_UNITS_PER_CENT
}

/// Render cents as the decimal string used for `ChainAmount` fields.
///
/// # Errors
///
/// Returns an error if the amount overflows micro-units.
pub fn chain_amount(cents: u64) -> Result<String> {
    Ok(cents_to_micro_units(cents)?.to_string())
}

/// Parse a `ChainAmount` string (integer micro-units).
///
/// # Errors
///
/// Returns an error if the string is not a non-negative integer.
pub fn parse_chain_amount(amount: &str) -> Result<u64> {
    amount
        .parse::<u64>()
        .map_err(|e| Error::Serialization(format!("invalid chain amount {amount:?}: {e}")))
}

/// Format cents as an exact USDC decimal string, e.g. `250` → `"2.50"`.
#[must_use]
pub fn format_usdc(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
