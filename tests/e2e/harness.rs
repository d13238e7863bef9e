//! Test harness wiring a workflow, ledger and scripted facilitator.

use async_trait::async_trait;
use chrono::Utc;
use k256::ecdsa::SigningKey;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use x402_tipjar::ledger::{LedgerSettings, PayoutLedger};
use x402_tipjar::payment::{
    encode_payment_header, Facilitator, PaymentPayload, PaymentRequirements, SettleResult,
    TipOutcome, TipRequest, TipWorkflow, VerifyResult,
};
use x402_tipjar::wallet::ownership::{address_from_verifying_key, personal_message_hash};
use x402_tipjar::wallet::{OwnershipProof, WalletOperation, WalletOwnershipChallenge};
use x402_tipjar::TipjarConfig;

/// Platform payee used by every harness.
pub const PAYEE: &str = "0x742d35cc6634c0532925a3b844bc9e7595916da2";

/// Payer the scripted facilitator reports.
pub const PAYER: &str = "0x1111111111111111111111111111111111111111";

/// Treasury receiving swept escrow.
pub const TREASURY: &str = "0x9999999999999999999999999999999999999999";

/// What the scripted facilitator answers to `verify`.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Payment is valid.
    Valid,
    /// Payment is invalid for the given reason.
    Invalid(String),
}

/// Facilitator whose answers are set by the test.
pub struct ScriptedFacilitator {
    verdict: Mutex<Verdict>,
    settle_ok: Mutex<bool>,
    verify_delay: Duration,
    verify_calls: AtomicU64,
    settle_calls: AtomicU64,
}

impl ScriptedFacilitator {
    /// Accept every payment and settle it.
    pub fn accepting() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Accept every payment after `verify_delay`.
    pub fn with_delay(verify_delay: Duration) -> Self {
        Self {
            verdict: Mutex::new(Verdict::Valid),
            settle_ok: Mutex::new(true),
            verify_delay,
            verify_calls: AtomicU64::new(0),
            settle_calls: AtomicU64::new(0),
        }
    }

    /// Change the verify answer.
    pub fn set_verdict(&self, verdict: Verdict) {
        *self.verdict.lock() = verdict;
    }

    /// Make settle succeed or fail.
    pub fn set_settle_ok(&self, ok: bool) {
        *self.settle_ok.lock() = ok;
    }

    /// Number of verify calls.
    pub fn verify_calls(&self) -> u64 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    /// Number of settle calls.
    pub fn settle_calls(&self) -> u64 {
        self.settle_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Facilitator for ScriptedFacilitator {
    async fn verify(
        &self,
        _payload: &PaymentPayload,
        _requirements: &PaymentRequirements,
    ) -> VerifyResult {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if !self.verify_delay.is_zero() {
            tokio::time::sleep(self.verify_delay).await;
        }
        let verdict = self.verdict.lock().clone();
        match verdict {
            Verdict::Valid => VerifyResult::valid(PAYER),
            Verdict::Invalid(reason) => VerifyResult::invalid(reason),
        }
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        _requirements: &PaymentRequirements,
    ) -> SettleResult {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        if *self.settle_ok.lock() {
            SettleResult {
                success: true,
                transaction_hash: Some(format!("settled-{}", payload.authorization_id())),
                error: None,
            }
        } else {
            SettleResult::failed("scripted settle failure")
        }
    }
}

/// An encoded `X-PAYMENT` header carrying `nonce`.
pub fn payment_header(nonce: &str) -> String {
    payment_header_from(PAYER, nonce)
}

/// An encoded `X-PAYMENT` header authorized by `from` with `nonce`.
pub fn payment_header_from(from: &str, nonce: &str) -> String {
    let payload: PaymentPayload = serde_json::from_value(json!({
        "x402Version": 1,
        "scheme": "exact",
        "network": "base-sepolia",
        "payload": {
            "signature": "0xdeadbeef",
            "authorization": {
                "from": from,
                "to": PAYEE,
                "nonce": nonce
            }
        }
    }))
    .expect("payload");
    encode_payment_header(&payload).expect("encode")
}

/// Workflow, ledger and facilitator for one test.
pub struct TestHarness {
    /// Validated configuration.
    pub config: TipjarConfig,
    /// In-memory ledger.
    pub ledger: Arc<PayoutLedger>,
    /// Scripted facilitator.
    pub facilitator: Arc<ScriptedFacilitator>,
    /// Tip workflow under test.
    pub workflow: TipWorkflow,
}

impl TestHarness {
    /// Harness with an accepting facilitator and one clip, `clip-1`, made
    /// by `agent-1`.
    pub fn setup() -> Self {
        Self::with_facilitator(ScriptedFacilitator::accepting())
    }

    /// Harness around a custom facilitator.
    pub fn with_facilitator(facilitator: ScriptedFacilitator) -> Self {
        let mut config = TipjarConfig::default();
        config.payment.payee_address = Some(PAYEE.to_string());
        config.ledger.treasury_address = Some(TREASURY.to_string());
        config.validate().expect("valid config");

        let settings = LedgerSettings::from(&config);
        let ledger = Arc::new(PayoutLedger::open_memory(settings).expect("ledger"));
        ledger
            .register_clip_variant("clip-1", "agent-1", Utc::now())
            .expect("register clip");

        let facilitator = Arc::new(facilitator);
        let workflow = TipWorkflow::new(
            &config,
            Arc::clone(&ledger),
            Arc::clone(&facilitator) as Arc<dyn Facilitator>,
        )
        .expect("workflow");

        Self {
            config,
            ledger,
            facilitator,
            workflow,
        }
    }

    /// Tip `clip-1` with a payment carrying `nonce`.
    pub async fn tip(&self, amount_cents: u64, nonce: &str) -> x402_tipjar::Result<TipOutcome> {
        self.workflow
            .handle_tip(TipRequest {
                clip_variant_id: "clip-1".to_string(),
                amount_cents,
                payment_header: Some(payment_header(nonce)),
            })
            .await
    }

    /// Ownership challenge service over this harness's ledger.
    pub fn ownership(&self) -> WalletOwnershipChallenge {
        WalletOwnershipChallenge::new(Arc::clone(&self.ledger), &self.config.ownership)
    }

    /// Run a full challenge for `operation` on `agent-1`, signed by `key`.
    pub fn prove(&self, key: &SigningKey, operation: WalletOperation) -> OwnershipProof {
        let ownership = self.ownership();
        let now = Utc::now();
        let challenge = ownership
            .generate_nonce("agent-1", &wallet_of(key), operation, now)
            .expect("challenge");
        ownership
            .verify("agent-1", &personal_sign(key, &challenge.message), &challenge.message, now)
            .expect("proof")
    }
}

/// Deterministic signing key.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).expect("valid key")
}

/// Wallet address of `key`.
pub fn wallet_of(key: &SigningKey) -> String {
    address_from_verifying_key(key.verifying_key()).to_string()
}

/// EIP-191 personal_sign of `message`, hex encoded with `v` in 27/28.
pub fn personal_sign(key: &SigningKey, message: &str) -> String {
    let digest = personal_message_hash(message.as_bytes());
    let (signature, recovery_id) = key.sign_prehash_recoverable(&digest).expect("sign");
    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    format!("0x{}", hex::encode(bytes))
}
