//! Error types for x402-tipjar.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable reason code reported when the facilitator cannot be reached.
pub const REASON_FACILITATOR_UNREACHABLE: &str = "facilitator_unreachable";

/// Stable reason code reported when a payment authorization was already credited.
pub const REASON_PAYMENT_ALREADY_USED: &str = "payment_already_used";

/// Errors that can occur in x402-tipjar.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error. Fatal at boot.
    #[error("configuration error: {0}")]
    Config(String),

    /// The facilitator judged the payment invalid. No ledger change was made.
    #[error("payment rejected: {reason}")]
    PaymentRejected {
        /// Stable reason code.
        reason: String,
    },

    /// The facilitator timed out, was unreachable or answered with a non-200 status.
    /// No ledger change was made; the client may retry.
    #[error("facilitator unreachable: {reason}")]
    FacilitatorUnreachable {
        /// Stable reason code (`facilitator_unreachable` or `facilitator_error_<status>`).
        reason: String,
    },

    /// Requested tip is below the configured minimum.
    #[error("tip of {amount_cents} cents is below the minimum of {minimum_cents} cents")]
    TipBelowMinimum {
        /// Requested amount.
        amount_cents: u64,
        /// Configured minimum.
        minimum_cents: u64,
    },

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent writers kept the ledger busy past the retry budget.
    #[error("ledger conflict: {0}")]
    LedgerConflict(String),

    /// Underlying SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Agent payout wallets are write-once.
    #[error("agent wallet for {agent_id} is already registered")]
    WalletImmutable {
        /// Agent whose wallet is already set.
        agent_id: String,
    },

    /// Wallet proof-of-control failed.
    #[error("ownership verification failed: {0}")]
    Ownership(String),

    /// Malformed wallet address.
    #[error("invalid wallet address: {0}")]
    InvalidAddress(String),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Caller failed the shared-secret check of an internal trigger.
    #[error("unauthorized")]
    Unauthorized,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Service is shutting down.
    #[error("service is shutting down")]
    ShuttingDown,
}

impl Error {
    /// Build the rejection for a facilitator-reported invalid payment.
    #[must_use]
    pub fn payment_invalid(facilitator_reason: Option<&str>) -> Self {
        let reason = match facilitator_reason {
            Some(r) if !r.is_empty() => format!("payment_invalid:{r}"),
            _ => "payment_invalid".to_string(),
        };
        Self::PaymentRejected { reason }
    }

    /// Stable, machine-readable code for this error.
    #[must_use]
    pub fn reason_code(&self) -> String {
        match self {
            Self::PaymentRejected { reason } | Self::FacilitatorUnreachable { reason } => {
                reason.clone()
            }
            Self::Config(_) => "configuration_error".to_string(),
            Self::TipBelowMinimum { .. } => "tip_below_minimum".to_string(),
            Self::NotFound(_) => "not_found".to_string(),
            Self::LedgerConflict(_) => "ledger_conflict".to_string(),
            Self::WalletImmutable { .. } => "wallet_immutable".to_string(),
            Self::Ownership(_) | Self::Crypto(_) => "ownership_unverified".to_string(),
            Self::InvalidAddress(_) => "invalid_address".to_string(),
            Self::Unauthorized => "unauthorized".to_string(),
            Self::ShuttingDown => "shutting_down".to_string(),
            Self::Database(_) | Self::Serialization(_) | Self::Io(_) => {
                "internal_error".to_string()
            }
        }
    }

    /// Whether the caller can retry the same request and reasonably expect success.
    ///
    /// `false` for payment-invalid outcomes, which never succeed on resubmission.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FacilitatorUnreachable { .. } | Self::LedgerConflict(_) | Self::ShuttingDown
        )
    }

    /// HTTP status an inbound router should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::PaymentRejected { reason } if reason == REASON_PAYMENT_ALREADY_USED => 409,
            Self::PaymentRejected { .. } => 402,
            Self::TipBelowMinimum { .. } | Self::InvalidAddress(_) => 400,
            Self::Ownership(_) | Self::Crypto(_) | Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::WalletImmutable { .. } | Self::LedgerConflict(_) => 409,
            Self::FacilitatorUnreachable { .. } | Self::ShuttingDown => 503,
            Self::Config(_) | Self::Database(_) | Self::Serialization(_) | Self::Io(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_invalid_reason() {
        let err = Error::payment_invalid(Some("insufficient_funds"));
        assert_eq!(err.reason_code(), "payment_invalid:insufficient_funds");
        assert_eq!(err.status_code(), 402);
        assert!(!err.is_retryable());

        let err = Error::payment_invalid(None);
        assert_eq!(err.reason_code(), "payment_invalid");
    }

    #[test]
    fn test_unreachable_is_retryable() {
        let err = Error::FacilitatorUnreachable {
            reason: "facilitator_error_502".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.reason_code(), "facilitator_error_502");
    }

    #[test]
    fn test_replay_maps_to_conflict() {
        let err = Error::PaymentRejected {
            reason: REASON_PAYMENT_ALREADY_USED.to_string(),
        };
        assert_eq!(err.status_code(), 409);
        assert!(!err.is_retryable());
    }
}
