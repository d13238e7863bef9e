//! Tip workflow from challenge to settlement.

use super::harness::{payment_header, payment_header_from, ScriptedFacilitator, TestHarness, Verdict, PAYEE, PAYER};
use std::sync::Arc;
use std::time::Duration;
use x402_tipjar::ledger::{PayoutStatus, RecipientKind, SettlementStatus};
use x402_tipjar::payment::{Facilitator, TipOutcome, TipRequest, TipWorkflow};
use x402_tipjar::Error;

#[tokio::test]
async fn test_tip_without_payment_gets_exact_challenge() {
    let harness = TestHarness::setup();
    let outcome = harness
        .workflow
        .handle_tip(TipRequest {
            clip_variant_id: "clip-1".to_string(),
            amount_cents: 250,
            payment_header: None,
        })
        .await
        .expect("challenge");

    let TipOutcome::PaymentRequired(body) = outcome else {
        panic!("expected 402");
    };
    assert_eq!(body.x402_version, 1);
    assert_eq!(body.accepts.len(), 1);
    let requirement = &body.accepts[0];
    assert_eq!(requirement.amount, "2500000");
    assert_eq!(requirement.pay_to, PAYEE);
    assert_eq!(requirement.scheme, "exact");
    assert_eq!(requirement.network, "base-sepolia");
    assert_eq!(body.payment_details.amount_cents, 250);

    assert_eq!(harness.facilitator.verify_calls(), 0);
    assert!(harness.ledger.tip_votes_for_clip("clip-1").expect("votes").is_empty());
}

#[tokio::test]
async fn test_garbage_header_gets_challenge() {
    let harness = TestHarness::setup();
    let outcome = harness
        .workflow
        .handle_tip(TipRequest {
            clip_variant_id: "clip-1".to_string(),
            amount_cents: 100,
            payment_header: Some("not a payment".to_string()),
        })
        .await
        .expect("challenge");
    assert!(matches!(outcome, TipOutcome::PaymentRequired(_)));
    assert_eq!(harness.facilitator.verify_calls(), 0);
}

#[tokio::test]
async fn test_invalid_payment_writes_nothing() {
    let harness = TestHarness::setup();
    harness
        .facilitator
        .set_verdict(Verdict::Invalid("insufficient_funds".to_string()));

    let err = harness.tip(250, "0xaa").await.expect_err("rejected");
    assert_eq!(err.status_code(), 402);
    assert!(err.reason_code().contains("insufficient_funds"));

    let clip = harness.ledger.clip_variant("clip-1").expect("q").expect("clip");
    assert_eq!(clip.vote_count, 0);
    assert_eq!(clip.tip_total, 0);
    assert!(harness.ledger.tip_votes_for_clip("clip-1").expect("votes").is_empty());
    assert_eq!(harness.facilitator.settle_calls(), 0);
}

#[tokio::test]
async fn test_valid_tip_credits_and_splits_exactly() {
    let harness = TestHarness::setup();
    let before = harness.ledger.clip_variant("clip-1").expect("q").expect("clip");

    let TipOutcome::Credited(receipt) = harness.tip(250, "0xbb").await.expect("credit") else {
        panic!("expected credit");
    };
    assert_eq!(receipt.body.payer_address, PAYER);
    assert_eq!(receipt.body.clip_variant.vote_count, before.vote_count + 1);
    assert_eq!(receipt.body.clip_variant.tip_total, before.tip_total + 250);

    let entries = harness
        .ledger
        .payout_entries_for_tip(&receipt.tip_vote_id)
        .expect("entries");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.iter().map(|e| e.amount_cents).sum::<u64>(), 250);

    let creator = entries
        .iter()
        .find(|e| e.recipient_kind == RecipientKind::Creator)
        .expect("creator entry");
    assert_eq!(creator.status, PayoutStatus::Escrowed);
    assert_eq!(creator.amount_cents, 200);
    assert!(receipt.escrowed);

    let outcome = receipt.settlement.await.expect("settle task");
    assert!(outcome.is_settled());
    let settlement = harness
        .ledger
        .settlement(&receipt.tip_vote_id)
        .expect("q")
        .expect("row");
    assert_eq!(settlement.status, SettlementStatus::Settled);
    assert_eq!(settlement.attempts, 1);
}

#[tokio::test]
async fn test_replayed_payment_rejected() {
    let harness = TestHarness::setup();
    let TipOutcome::Credited(first) = harness.tip(100, "0xcc").await.expect("first") else {
        panic!("expected credit");
    };
    first.settlement.await.expect("settle");

    let err = harness.tip(100, "0xCC").await.expect_err("replay");
    assert_eq!(err.status_code(), 409);
    assert_eq!(harness.facilitator.verify_calls(), 1);

    let clip = harness.ledger.clip_variant("clip-1").expect("q").expect("clip");
    assert_eq!(clip.vote_count, 1);
    assert_eq!(clip.tip_total, 100);
}

#[tokio::test]
async fn test_same_nonce_from_another_payer_is_credited() {
    let harness = TestHarness::setup();
    let TipOutcome::Credited(first) = harness.tip(100, "0x01").await.expect("first") else {
        panic!("expected credit");
    };
    first.settlement.await.expect("settle");

    let second = harness
        .workflow
        .handle_tip(TipRequest {
            clip_variant_id: "clip-1".to_string(),
            amount_cents: 100,
            payment_header: Some(payment_header_from(
                "0x4444444444444444444444444444444444444444",
                "0x01",
            )),
        })
        .await
        .expect("second payer");
    let TipOutcome::Credited(second) = second else {
        panic!("expected credit");
    };
    second.settlement.await.expect("settle");

    let clip = harness.ledger.clip_variant("clip-1").expect("q").expect("clip");
    assert_eq!(clip.vote_count, 2);
    assert_eq!(clip.tip_total, 200);
}

#[tokio::test]
async fn test_settle_failure_keeps_credit_and_reconciles() {
    let harness = TestHarness::setup();
    harness.facilitator.set_settle_ok(false);

    let TipOutcome::Credited(receipt) = harness.tip(250, "0xdd").await.expect("credit") else {
        panic!("expected credit");
    };
    assert!(!receipt.settlement.await.expect("settle task").is_settled());
    let settlement = harness
        .ledger
        .settlement(&receipt.tip_vote_id)
        .expect("q")
        .expect("row");
    assert_eq!(settlement.status, SettlementStatus::Failed);
    assert_eq!(
        harness.ledger.clip_variant("clip-1").expect("q").expect("clip").vote_count,
        1
    );

    harness.facilitator.set_settle_ok(true);
    let report = harness
        .workflow
        .settler()
        .reconcile(5, chrono::Utc::now(), 10)
        .await
        .expect("reconcile");
    assert_eq!(report.attempted, 1);
    assert_eq!(report.settled, 1);

    let settlement = harness
        .ledger
        .settlement(&receipt.tip_vote_id)
        .expect("q")
        .expect("row");
    assert_eq!(settlement.status, SettlementStatus::Settled);
    assert_eq!(settlement.attempts, 2);
}

#[tokio::test]
async fn test_unknown_clip_and_minimum() {
    let harness = TestHarness::setup();
    let err = harness
        .workflow
        .handle_tip(TipRequest {
            clip_variant_id: "missing".to_string(),
            amount_cents: 100,
            payment_header: Some(payment_header("0xee")),
        })
        .await
        .expect_err("unknown clip");
    assert!(matches!(err, Error::NotFound(_)));

    let err = harness.tip(1, "0xef").await.expect_err("too small");
    assert!(matches!(err, Error::TipBelowMinimum { .. }));
    assert_eq!(harness.facilitator.verify_calls(), 0);
}

#[tokio::test]
async fn test_slow_facilitator_times_out_without_credit() {
    let mut harness =
        TestHarness::with_facilitator(ScriptedFacilitator::with_delay(Duration::from_secs(5)));
    harness.config.payment.max_timeout_seconds = 1;
    harness.workflow = TipWorkflow::new(
        &harness.config,
        Arc::clone(&harness.ledger),
        Arc::clone(&harness.facilitator) as Arc<dyn Facilitator>,
    )
    .expect("workflow");

    let err = harness.tip(250, "0xf0").await.expect_err("timeout");
    assert!(matches!(err, Error::FacilitatorUnreachable { .. }));
    assert!(err.is_retryable());
    assert!(harness.ledger.tip_votes_for_clip("clip-1").expect("votes").is_empty());
}
