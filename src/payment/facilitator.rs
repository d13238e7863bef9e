//! Facilitator client.
//!
//! The facilitator is the trust anchor: it checks the payer's signature and
//! funds (`/verify`) and executes the transfer (`/settle`). Transport
//! problems never surface as errors here. They come back as a negative
//! result carrying a stable reason code, so callers fail closed.

use super::header::PaymentPayload;
use super::requirements::{PaymentRequirements, X402_VERSION};
use crate::config::FacilitatorConfig;
use crate::error::{Error, Result, REASON_FACILITATOR_UNREACHABLE};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reason prefix for non-200 facilitator answers.
pub const REASON_FACILITATOR_ERROR_PREFIX: &str = "facilitator_error_";

/// Reason used when a 200 answer has an unreadable body.
pub const REASON_FACILITATOR_INVALID_BODY: &str = "facilitator_error_invalid_body";

/// Answer to `/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    /// Whether the payment may be credited.
    pub is_valid: bool,
    /// Payer wallet as determined by the facilitator.
    #[serde(default, alias = "payer")]
    pub payer_address: Option<String>,
    /// Reason when invalid.
    #[serde(default)]
    pub invalid_reason: Option<String>,
    /// Set only by the client when no judgement was obtained.
    #[serde(skip)]
    transport_failure: bool,
}

impl VerifyResult {
    /// A positive result for `payer_address`.
    #[must_use]
    pub fn valid(payer_address: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            payer_address: Some(payer_address.into()),
            invalid_reason: None,
            transport_failure: false,
        }
    }

    /// A negative judgement with `reason`.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            payer_address: None,
            invalid_reason: Some(reason.into()),
            transport_failure: false,
        }
    }

    /// No judgement was obtained: timeout, network failure, non-200 status
    /// or an unreadable body. `reason` is the stable reason code.
    #[must_use]
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            transport_failure: true,
            ..Self::invalid(reason)
        }
    }

    /// The result reflects a transport failure rather than a judgement on
    /// the payment.
    #[must_use]
    pub fn is_transport_failure(&self) -> bool {
        !self.is_valid && self.transport_failure
    }

    /// Convert a negative result into the matching error.
    #[must_use]
    pub fn into_error(self) -> Error {
        if self.is_transport_failure() {
            Error::FacilitatorUnreachable {
                reason: self
                    .invalid_reason
                    .unwrap_or_else(|| REASON_FACILITATOR_UNREACHABLE.to_string()),
            }
        } else {
            Error::payment_invalid(self.invalid_reason.as_deref())
        }
    }
}

/// Answer to `/settle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResult {
    /// Whether the transfer executed.
    pub success: bool,
    /// On-chain transaction hash.
    #[serde(default, alias = "transaction")]
    pub transaction_hash: Option<String>,
    /// Failure description.
    #[serde(default, alias = "errorReason")]
    pub error: Option<String>,
}

impl SettleResult {
    /// A failed settlement with `error`.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_hash: None,
            error: Some(error.into()),
        }
    }
}

/// Verify/settle against a facilitator.
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Ask whether `payload` satisfies `requirements`. Must precede any credit.
    async fn verify(&self, payload: &PaymentPayload, requirements: &PaymentRequirements) -> VerifyResult;

    /// Execute the verified payment. Called only after the ledger credit.
    async fn settle(&self, payload: &PaymentPayload, requirements: &PaymentRequirements) -> SettleResult;
}

/// Facilitator endpoint being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/verify`
    Verify,
    /// `/settle`
    Settle,
}

impl Endpoint {
    /// URL path segment.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Settle => "settle",
        }
    }
}

/// Supplies the `Authorization` header for facilitator calls.
///
/// Deployments plug in the facilitator's documented signing scheme here.
pub trait CredentialProvider: Send + Sync {
    /// Header value for a call to `endpoint`, or `None` to send none.
    ///
    /// # Errors
    ///
    /// Returns an error if a credential cannot be produced; the call is then
    /// treated as unreachable.
    fn authorization(&self, endpoint: Endpoint) -> Result<Option<String>>;
}

/// Static API key sent as a bearer token.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap an API key.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

impl CredentialProvider for BearerToken {
    fn authorization(&self, _endpoint: Endpoint) -> Result<Option<String>> {
        Ok(Some(format!("Bearer {}", self.0)))
    }
}

/// Sends no credential (public testnet facilitators).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn authorization(&self, _endpoint: Endpoint) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FacilitatorRequest<'a> {
    x402_version: u32,
    payment_payload: &'a PaymentPayload,
    payment_requirements: &'a PaymentRequirements,
}

/// HTTP facilitator client.
pub struct HttpFacilitator {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpFacilitator {
    /// Create a client for the configured facilitator. A configured API key
    /// becomes a [`BearerToken`]; otherwise no credential is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &FacilitatorConfig, timeout: Duration) -> Result<Self> {
        let credentials: Arc<dyn CredentialProvider> = match config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Arc::new(BearerToken::new(key.trim())),
            _ => Arc::new(NoCredentials),
        };
        Self::with_credentials(&config.url, timeout, credentials)
    }

    /// Create a client with an explicit credential provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_credentials(
        base_url: &str,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("x402-tipjar/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        info!("Facilitator client for {base_url} (timeout {}s)", timeout.as_secs());
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    /// POST to `endpoint` and decode a 200 body, mapping every failure to a
    /// stable reason code.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> std::result::Result<T, String> {
        let body = FacilitatorRequest {
            x402_version: X402_VERSION,
            payment_payload: payload,
            payment_requirements: requirements,
        };

        let mut request = self.client.post(self.url(endpoint)).json(&body);
        match self.credentials.authorization(endpoint) {
            Ok(Some(value)) => request = request.header(reqwest::header::AUTHORIZATION, value),
            Ok(None) => {}
            Err(e) => {
                warn!("Facilitator credential unavailable: {e}");
                return Err(REASON_FACILITATOR_UNREACHABLE.to_string());
            }
        }

        let response = request.send().await.map_err(|e| {
            warn!("Facilitator {} request failed: {e}", endpoint.path());
            REASON_FACILITATOR_UNREACHABLE.to_string()
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Facilitator {} returned status {status}", endpoint.path());
            return Err(format!("{REASON_FACILITATOR_ERROR_PREFIX}{}", status.as_u16()));
        }

        response.json::<T>().await.map_err(|e| {
            warn!("Facilitator {} body unreadable: {e}", endpoint.path());
            REASON_FACILITATOR_INVALID_BODY.to_string()
        })
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify(&self, payload: &PaymentPayload, requirements: &PaymentRequirements) -> VerifyResult {
        match self.call::<VerifyResult>(Endpoint::Verify, payload, requirements).await {
            Ok(result) => {
                debug!(is_valid = result.is_valid, "Facilitator verify answered");
                result
            }
            Err(reason) => VerifyResult::unreachable(reason),
        }
    }

    async fn settle(&self, payload: &PaymentPayload, requirements: &PaymentRequirements) -> SettleResult {
        match self.call::<SettleResult>(Endpoint::Settle, payload, requirements).await {
            Ok(result) => {
                debug!(success = result.success, "Facilitator settle answered");
                result
            }
            Err(reason) => SettleResult::failed(reason),
        }
    }
}

/// Offline facilitator for mock mode and tests.
///
/// Accepts every payment unless built with [`MockFacilitator::rejecting`];
/// settlement succeeds with a deterministic hash unless built with
/// [`MockFacilitator::failing_settlement`].
#[derive(Debug, Default)]
pub struct MockFacilitator {
    reject_reason: Option<String>,
    settle_error: Option<String>,
    verify_calls: AtomicU64,
    settle_calls: AtomicU64,
}

/// Payer reported when the payload names none.
pub const MOCK_PAYER: &str = "0x000000000000000000000000000000000000dead";

impl MockFacilitator {
    /// Accept everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every payment with `reason`.
    #[must_use]
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            reject_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Accept payments but fail every settlement with `error`.
    #[must_use]
    pub fn failing_settlement(error: impl Into<String>) -> Self {
        Self {
            settle_error: Some(error.into()),
            ..Self::default()
        }
    }

    /// `/verify` calls made.
    #[must_use]
    pub fn verify_calls(&self) -> u64 {
        self.verify_calls.load(Ordering::Relaxed)
    }

    /// `/settle` calls made.
    #[must_use]
    pub fn settle_calls(&self) -> u64 {
        self.settle_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Facilitator for MockFacilitator {
    async fn verify(&self, payload: &PaymentPayload, _requirements: &PaymentRequirements) -> VerifyResult {
        self.verify_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(reason) = &self.reject_reason {
            return VerifyResult::invalid(reason.clone());
        }
        VerifyResult::valid(payload.payer_hint().unwrap_or(MOCK_PAYER))
    }

    async fn settle(&self, payload: &PaymentPayload, _requirements: &PaymentRequirements) -> SettleResult {
        self.settle_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = &self.settle_error {
            return SettleResult::failed(error.clone());
        }
        let hash = Sha256::digest(payload.authorization_id().as_bytes());
        SettleResult {
            success: true,
            transaction_hash: Some(format!("0x{}", hex::encode(hash))),
            error: None,
        }
    }
}
