//! EVM wallet addresses and proof-of-control.
//!
//! Payout wallets (creator, agent, treasury, payee) are 20-byte EVM
//! addresses. Addresses are compared and stored in lowercase `0x` form.

pub mod ownership;

pub use ownership::{OwnershipProof, WalletChallenge, WalletOperation, WalletOwnershipChallenge};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed 20-byte EVM address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress([u8; 20]);

impl WalletAddress {
    /// Wrap raw address bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        parse_wallet_address(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(addr: WalletAddress) -> Self {
        addr.to_string()
    }
}

impl std::str::FromStr for WalletAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_wallet_address(s)
    }
}

/// Parse an EVM address string into a [`WalletAddress`].
///
/// # Errors
///
/// Returns an error if the address format is invalid.
pub fn parse_wallet_address(address: &str) -> Result<WalletAddress> {
    // Should start with 0x and be 42 characters total (0x + 40 hex chars)
    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(Error::InvalidAddress(format!(
            "must start with '0x', got: {address}"
        )));
    }

    if address.len() != 42 {
        return Err(Error::InvalidAddress(format!(
            "expected 42 characters, got {}",
            address.len()
        )));
    }

    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidAddress(format!(
            "contains non-hex characters: {address}"
        )));
    }

    let bytes = hex::decode(hex_part)
        .map_err(|e| Error::InvalidAddress(format!("failed to decode {address}: {e}")))?;

    let mut address_bytes = [0u8; 20];
    address_bytes.copy_from_slice(&bytes);

    Ok(WalletAddress(address_bytes))
}

/// Validate that an EVM address is properly formatted.
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    parse_wallet_address(address).is_ok()
}

/// Normalize an address string to lowercase `0x` form.
///
/// # Errors
///
/// Returns an error if the address format is invalid.
pub fn normalize_address(address: &str) -> Result<String> {
    parse_wallet_address(address).map(|a| a.to_string())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_address() {
        let address = "0x742d35Cc6634C0532925a3b844Bc9e7595916Da2";
        let parsed = parse_wallet_address(address).expect("valid");
        assert_eq!(parsed.to_string(), address.to_lowercase());
    }

    #[test]
    fn test_invalid_prefix() {
        assert!(parse_wallet_address("742d35Cc6634C0532925a3b844Bc9e7595916Da2").is_err());
    }

    #[test]
    fn test_invalid_length() {
        assert!(parse_wallet_address("0x742d35Cc6634C0532925a3b844Bc9e7595916Da").is_err());
    }

    #[test]
    fn test_invalid_hex_chars() {
        assert!(parse_wallet_address("0x742d35Cc6634C0532925a3b844Bc9e7595916DgZ").is_err());
    }

    #[test]
    fn test_serde_uses_string_form() {
        let addr = parse_wallet_address("0x742d35Cc6634C0532925a3b844Bc9e7595916Da2")
            .expect("valid");
        let json = serde_json::to_string(&addr).expect("serialize");
        assert_eq!(json, "\"0x742d35cc6634c0532925a3b844bc9e7595916da2\"");
        let back: WalletAddress = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<WalletAddress>("\"0xnope\"").is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize_address("0X742D35CC6634C0532925A3B844BC9E7595916DA2").expect("valid"),
            "0x742d35cc6634c0532925a3b844bc9e7595916da2"
        );
    }
}
