//! Inbound payment header decoding.
//!
//! The header carries base64-encoded JSON or raw JSON. Anything that does
//! not decode to a payload with a protocol version and a non-empty body is
//! treated as "no payment", which the workflow answers with a 402.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Name of the inbound payment header.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Client-signed payment, opaque except for the fields read here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version.
    pub x402_version: u32,
    /// Payment scheme, when the client states it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Network, when the client states it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Scheme-specific signed body.
    pub payload: Value,
}

impl PaymentPayload {
    fn authorization_field(&self, field: &str) -> Option<&str> {
        self.payload
            .get("authorization")
            .and_then(|auth| auth.get(field))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Payer wallet claimed by the authorization (`authorization.from`).
    ///
    /// Unverified; the facilitator's answer is authoritative.
    #[must_use]
    pub fn payer_hint(&self) -> Option<&str> {
        self.authorization_field("from")
    }

    /// Identifier of the signed authorization used for replay protection.
    ///
    /// EIP-3009 nonces are only unique per authorizer, so the id is
    /// `from:nonce` (lowercased) when both are present. Anything else falls
    /// back to the SHA-256 of the payload's JSON encoding.
    #[must_use]
    pub fn authorization_id(&self) -> String {
        if let (Some(from), Some(nonce)) = (self.payer_hint(), self.authorization_field("nonce")) {
            return format!("{from}:{nonce}").to_ascii_lowercase();
        }
        // serde_json maps iterate in key order, so the encoding is stable
        let encoded = serde_json::to_vec(&self.payload).unwrap_or_default();
        format!("sha256:{}", hex::encode(Sha256::digest(&encoded)))
    }
}

/// Decode a payment header value.
///
/// Returns `None` when the header is missing, not base64/JSON, lacks
/// `x402Version`, or has an empty `payload`.
#[must_use]
pub fn decode_payment_header(value: Option<&str>) -> Option<PaymentPayload> {
    let raw = value.map(str::trim).filter(|v| !v.is_empty())?;

    let json = if raw.starts_with('{') {
        raw.as_bytes().to_vec()
    } else {
        match STANDARD.decode(raw).or_else(|_| URL_SAFE.decode(raw)) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Payment header is neither JSON nor base64: {e}");
                return None;
            }
        }
    };

    let payload: PaymentPayload = match serde_json::from_slice(&json) {
        Ok(p) => p,
        Err(e) => {
            debug!("Payment header is not a payment payload: {e}");
            return None;
        }
    };

    let has_body = payload.payload.as_object().is_some_and(|body| !body.is_empty());
    if !has_body {
        debug!("Payment header has an empty payload body");
        return None;
    }

    Some(payload)
}

/// Encode a payload as a base64 header value.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn encode_payment_header(payload: &PaymentPayload) -> serde_json::Result<String> {
    Ok(STANDARD.encode(serde_json::to_vec(payload)?))
}
