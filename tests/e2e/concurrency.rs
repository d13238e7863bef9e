//! Concurrent tips, replays and escrow races.

use super::harness::{signing_key, ScriptedFacilitator, TestHarness};
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use x402_tipjar::payment::TipOutcome;
use x402_tipjar::WalletOperation;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tips_both_counted() {
    let harness = Arc::new(TestHarness::with_facilitator(ScriptedFacilitator::with_delay(
        Duration::from_millis(50),
    )));

    let handles: Vec<_> = ["0xa1", "0xa2"]
        .into_iter()
        .map(|nonce| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move { harness.tip(100, nonce).await })
        })
        .collect();

    for joined in join_all(handles).await {
        let TipOutcome::Credited(receipt) = joined.expect("join").expect("credit") else {
            panic!("expected credit");
        };
        receipt.settlement.await.expect("settle");
    }

    let clip = harness.ledger.clip_variant("clip-1").expect("q").expect("clip");
    assert_eq!(clip.vote_count, 2);
    assert_eq!(clip.tip_total, 200);
    assert_eq!(harness.ledger.tip_votes_for_clip("clip-1").expect("votes").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_replay_credits_once() {
    let harness = Arc::new(TestHarness::with_facilitator(ScriptedFacilitator::with_delay(
        Duration::from_millis(50),
    )));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move { harness.tip(100, "0xb1").await })
        })
        .collect();

    let mut credited = 0;
    let mut rejected = 0;
    for joined in join_all(handles).await {
        match joined.expect("join") {
            Ok(TipOutcome::Credited(receipt)) => {
                receipt.settlement.await.expect("settle");
                credited += 1;
            }
            Ok(TipOutcome::PaymentRequired(_)) => panic!("unexpected challenge"),
            Err(e) => {
                assert_eq!(e.status_code(), 409);
                rejected += 1;
            }
        }
    }
    assert_eq!((credited, rejected), (1, 1));

    let clip = harness.ledger.clip_variant("clip-1").expect("q").expect("clip");
    assert_eq!(clip.vote_count, 1);
    assert_eq!(clip.tip_total, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claim_and_sweep_race_has_one_winner() {
    let harness = TestHarness::setup();
    let TipOutcome::Credited(receipt) = harness.tip(1250, "0xc1").await.expect("credit") else {
        panic!("expected credit");
    };
    receipt.settlement.await.expect("settle");

    let proof = harness.prove(&signing_key(21), WalletOperation::SetCreatorWallet);
    let at = Utc::now() + ChronoDuration::days(31);
    let claim_ledger = Arc::clone(&harness.ledger);
    let sweep_ledger = Arc::clone(&harness.ledger);
    let claim = tokio::task::spawn_blocking(move || {
        claim_ledger.set_creator_wallet("agent-1", &proof, at)
    });
    let sweep = tokio::task::spawn_blocking(move || sweep_ledger.sweep(at));

    let claimed = claim.await.expect("join").expect("claim");
    let swept = sweep.await.expect("join").expect("sweep");
    assert_eq!(claimed.funds_claimed + swept.funds_swept, 1);
    assert_eq!(claimed.amount_cents + swept.amount_cents, 1000);
}
