//! Tip verification workflow.
//!
//! ```text
//! NoPayment ──▶ 402 challenge
//!     │
//!  Decoded ──verify──▶ Rejected (no ledger change)
//!     │
//!  Verified ──split + credit (one tx)──▶ Credited ──settle──▶ Settled
//!                                                      └────▶ SettlementFailed
//! ```
//!
//! Nothing is written to the ledger before the facilitator says the payment
//! is valid, so dropping the future before that point leaves no trace.

use super::facilitator::{Facilitator, VerifyResult};
use super::header::{decode_payment_header, PaymentPayload, PAYMENT_HEADER};
use super::replay::ConsumedAuthorizations;
use super::requirements::{PaymentChallengeBuilder, PaymentRequiredBody, PaymentRequirements};
use super::settlement::{SettlementOutcome, Settler};
use crate::config::TipjarConfig;
use crate::error::{Error, Result, REASON_FACILITATOR_UNREACHABLE, REASON_PAYMENT_ALREADY_USED};
use crate::event::{emit, ServiceEvent, ServiceEventsSender};
use crate::ledger::{spawn_ledger, ClipVariant, PayoutLedger, TipCredit};
use crate::revenue::{split, RevenueSplit, SplitPercentages};
use crate::wallet::normalize_address;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Inbound tip.
#[derive(Debug, Clone)]
pub struct TipRequest {
    /// Clip variant being voted for.
    pub clip_variant_id: String,
    /// Requested tip in cents.
    pub amount_cents: u64,
    /// Raw payment header value, if sent.
    pub payment_header: Option<String>,
}

/// Split amounts in the success body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutSummary {
    /// Creator share in cents.
    pub creator_amount: u64,
    /// Platform share in cents.
    pub platform_amount: u64,
    /// Agent share in cents.
    pub agent_amount: u64,
}

impl From<RevenueSplit> for PayoutSummary {
    fn from(split: RevenueSplit) -> Self {
        Self {
            creator_amount: split.creator_cents,
            platform_amount: split.platform_cents,
            agent_amount: split.agent_cents,
        }
    }
}

/// Body of a `200` tip response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipSuccessBody {
    /// Always `true`.
    pub success: bool,
    /// Clip totals after this tip.
    pub clip_variant: ClipVariant,
    /// How the tip was split.
    pub payout: PayoutSummary,
    /// Payer wallet.
    pub payer_address: String,
}

/// A credited tip.
#[derive(Debug)]
pub struct TipReceipt {
    /// Response body.
    pub body: TipSuccessBody,
    /// New tip vote.
    pub tip_vote_id: String,
    /// Creator share went to escrow.
    pub escrowed: bool,
    /// Background settlement. Dropping the handle does not cancel it.
    pub settlement: JoinHandle<SettlementOutcome>,
}

/// Result of handling a tip request.
#[derive(Debug)]
pub enum TipOutcome {
    /// No usable payment header: answer `402` with this body.
    PaymentRequired(Box<PaymentRequiredBody>),
    /// Payment verified and credited: answer `200` with the receipt body.
    Credited(TipReceipt),
}

/// Orchestrates decode, verify, split, credit and settle for tips.
pub struct TipWorkflow {
    ledger: Arc<PayoutLedger>,
    facilitator: Arc<dyn Facilitator>,
    builder: PaymentChallengeBuilder,
    splits: SplitPercentages,
    platform_address: Option<String>,
    replay: ConsumedAuthorizations,
    timeout: Duration,
    settler: Settler,
    events: Option<ServiceEventsSender>,
}

impl TipWorkflow {
    /// Build the workflow from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no payee is configured outside mock mode.
    pub fn new(
        config: &TipjarConfig,
        ledger: Arc<PayoutLedger>,
        facilitator: Arc<dyn Facilitator>,
    ) -> Result<Self> {
        let builder = PaymentChallengeBuilder::new(config)?;
        let platform_address = config
            .payment
            .payee_address
            .as_deref()
            .map(normalize_address)
            .transpose()?;
        let timeout = Duration::from_secs(config.payment.max_timeout_seconds);

        Ok(Self {
            settler: Settler::new(Arc::clone(&facilitator), Arc::clone(&ledger), timeout, None),
            ledger,
            facilitator,
            builder,
            splits: config.splits,
            platform_address,
            replay: ConsumedAuthorizations::with_capacity(config.payment.replay_cache_capacity),
            timeout,
            events: None,
        })
    }

    /// Publish events to `sender`.
    #[must_use]
    pub fn with_events(mut self, sender: ServiceEventsSender) -> Self {
        self.settler = Settler::new(
            Arc::clone(&self.facilitator),
            Arc::clone(&self.ledger),
            self.timeout,
            Some(sender.clone()),
        );
        self.events = Some(sender);
        self
    }

    /// Settler sharing this workflow's facilitator and ledger.
    #[must_use]
    pub fn settler(&self) -> &Settler {
        &self.settler
    }

    /// Resource path of a clip's tip endpoint.
    #[must_use]
    pub fn resource_for(clip_variant_id: &str) -> String {
        format!("/voting/clips/{clip_variant_id}/tip")
    }

    /// Build the 402 challenge for a tip without touching the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TipBelowMinimum`] below the configured minimum.
    pub fn challenge(&self, clip_variant_id: &str, amount_cents: u64) -> Result<PaymentRequiredBody> {
        let requirements = self.requirements(clip_variant_id, amount_cents)?;
        Ok(self.builder.payment_required(
            requirements,
            amount_cents,
            &format!("{PAYMENT_HEADER} header is required"),
        ))
    }

    fn requirements(&self, clip_variant_id: &str, amount_cents: u64) -> Result<PaymentRequirements> {
        self.builder.build(
            &Self::resource_for(clip_variant_id),
            amount_cents,
            &format!("Tip vote for clip {clip_variant_id}"),
        )
    }

    /// Handle one tip request.
    ///
    /// # Errors
    ///
    /// - [`Error::TipBelowMinimum`] below the configured minimum
    /// - [`Error::NotFound`] for an unknown clip variant
    /// - [`Error::PaymentRejected`] when the facilitator says the payment is
    ///   invalid or the authorization was already credited
    /// - [`Error::FacilitatorUnreachable`] on facilitator timeout or failure
    /// - [`Error::LedgerConflict`] if the credit could not be committed
    pub async fn handle_tip(&self, request: TipRequest) -> Result<TipOutcome> {
        let TipRequest {
            clip_variant_id,
            amount_cents,
            payment_header,
        } = request;

        if amount_cents < self.builder.min_tip_cents() {
            return Err(Error::TipBelowMinimum {
                amount_cents,
                minimum_cents: self.builder.min_tip_cents(),
            });
        }

        let lookup_id = clip_variant_id.clone();
        let clip = spawn_ledger(&self.ledger, move |ledger| ledger.clip_variant(&lookup_id)).await?;
        if clip.is_none() {
            return Err(Error::NotFound(format!("clip variant {clip_variant_id}")));
        }

        let requirements = self.requirements(&clip_variant_id, amount_cents)?;

        let Some(payload) = decode_payment_header(payment_header.as_deref()) else {
            debug!(%clip_variant_id, amount_cents, "No usable payment header, issuing challenge");
            return Ok(TipOutcome::PaymentRequired(Box::new(self.builder.payment_required(
                requirements,
                amount_cents,
                &format!("{PAYMENT_HEADER} header is required"),
            ))));
        };

        let authorization_id = payload.authorization_id();
        if self.replay.contains(&authorization_id) {
            warn!(%clip_variant_id, "Rejected resubmitted payment authorization");
            return Err(Error::PaymentRejected {
                reason: REASON_PAYMENT_ALREADY_USED.to_string(),
            });
        }

        let verified = self.verify(&payload, &requirements).await;
        if !verified.is_valid {
            let err = verified.into_error();
            warn!(%clip_variant_id, reason = %err.reason_code(), "Tip payment not verified");
            return Err(err);
        }

        let payer_address = verified
            .payer_address
            .or_else(|| payload.payer_hint().map(str::to_string))
            .unwrap_or_default();
        let shares = split(amount_cents, &self.splits);

        let credit = TipCredit {
            clip_variant_id: clip_variant_id.clone(),
            payer_address: payer_address.clone(),
            amount_cents,
            authorization_id: authorization_id.clone(),
            split: shares,
            platform_address: self.platform_address.clone(),
            payload_json: serde_json::to_string(&payload)
                .map_err(|e| Error::Serialization(e.to_string()))?,
            requirements_json: serde_json::to_string(&requirements)
                .map_err(|e| Error::Serialization(e.to_string()))?,
        };

        let credited = match spawn_ledger(&self.ledger, move |ledger| ledger.record_tip(&credit, Utc::now())).await {
            Ok(credited) => credited,
            Err(e) => {
                if e.reason_code() == REASON_PAYMENT_ALREADY_USED {
                    self.replay.insert(authorization_id);
                }
                return Err(e);
            }
        };
        self.replay.insert(authorization_id);

        let tip_vote_id = credited.tip_vote.id.clone();
        let escrowed = credited.payouts.escrowed.is_some();
        info!(
            %tip_vote_id,
            %clip_variant_id,
            amount_cents,
            %payer_address,
            "Tip verified and credited"
        );
        if let Some(events) = &self.events {
            emit(
                events,
                ServiceEvent::TipCredited {
                    tip_vote_id: tip_vote_id.clone(),
                    clip_variant_id: clip_variant_id.clone(),
                    amount_cents,
                    escrowed,
                },
            );
        }

        let settler = self.settler.clone();
        let settle_id = tip_vote_id.clone();
        let settlement = tokio::spawn(async move {
            settler.settle(&settle_id, &payload, &requirements).await
        });

        Ok(TipOutcome::Credited(TipReceipt {
            body: TipSuccessBody {
                success: true,
                clip_variant: credited.clip_variant,
                payout: credited.split.into(),
                payer_address,
            },
            tip_vote_id,
            escrowed,
            settlement,
        }))
    }

    async fn verify(&self, payload: &PaymentPayload, requirements: &PaymentRequirements) -> VerifyResult {
        match tokio::time::timeout(self.timeout, self.facilitator.verify(payload, requirements)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Facilitator verify timed out after {}s", self.timeout.as_secs());
                VerifyResult::unreachable(REASON_FACILITATOR_UNREACHABLE)
            }
        }
    }
}
