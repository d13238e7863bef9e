//! Escrow claim and sweep through real tips.

use super::harness::{signing_key, wallet_of, TestHarness, TREASURY};
use chrono::{Duration, Utc};
use x402_tipjar::ledger::{PayoutStatus, RecipientKind};
use x402_tipjar::payment::TipOutcome;
use x402_tipjar::{Error, WalletOperation};

/// Tip 1250 cents so exactly 1000 lands in escrow.
async fn escrow_thousand(harness: &TestHarness, nonce: &str) {
    let TipOutcome::Credited(receipt) = harness.tip(1250, nonce).await.expect("credit") else {
        panic!("expected credit");
    };
    assert!(receipt.escrowed);
    assert_eq!(receipt.body.payout.creator_amount, 1000);
    receipt.settlement.await.expect("settle");
}

#[tokio::test]
async fn test_claim_converts_escrow_exactly_once() {
    let harness = TestHarness::setup();
    escrow_thousand(&harness, "0x01").await;
    assert_eq!(harness.ledger.unclaimed_balance("agent-1").expect("balance"), 1000);

    let key = signing_key(11);
    let creator = wallet_of(&key);
    let stranger = wallet_of(&signing_key(12));
    assert!(matches!(
        harness.ledger.claim("agent-1", &stranger, Utc::now()),
        Err(Error::Ownership(_))
    ));
    assert_eq!(harness.ledger.unclaimed_balance("agent-1").expect("balance"), 1000);

    let proof = harness.prove(&key, WalletOperation::SetCreatorWallet);
    let claimed = harness
        .ledger
        .set_creator_wallet("agent-1", &proof, Utc::now())
        .expect("claim");
    assert_eq!(claimed.funds_claimed, 1);
    assert_eq!(claimed.amount_cents, 1000);
    assert_eq!(claimed.entries.len(), 1);
    assert_eq!(claimed.entries[0].status, PayoutStatus::Pending);
    assert_eq!(claimed.entries[0].recipient_address.as_deref(), Some(creator.as_str()));

    let again = harness.ledger.claim("agent-1", &creator, Utc::now()).expect("claim again");
    assert!(again.is_empty());
    assert_eq!(harness.ledger.unclaimed_balance("agent-1").expect("balance"), 0);
}

#[tokio::test]
async fn test_expired_escrow_swept_once() {
    let harness = TestHarness::setup();
    escrow_thousand(&harness, "0x02").await;

    let early = harness.ledger.sweep(Utc::now()).expect("sweep");
    assert!(early.is_empty());

    let later = Utc::now() + Duration::days(31);
    let swept = harness.ledger.sweep(later).expect("sweep");
    assert_eq!(swept.funds_swept, 1);
    assert_eq!(swept.amount_cents, 1000);
    assert_eq!(swept.treasury_entries.len(), 1);
    let entry = &swept.treasury_entries[0];
    assert_eq!(entry.recipient_kind, RecipientKind::Treasury);
    assert_eq!(entry.recipient_address.as_deref(), Some(TREASURY));
    assert_eq!(entry.status, PayoutStatus::Pending);

    assert!(harness.ledger.sweep(later).expect("sweep again").is_empty());
    let proof = harness.prove(&signing_key(13), WalletOperation::SetCreatorWallet);
    assert!(harness
        .ledger
        .set_creator_wallet("agent-1", &proof, later)
        .expect("claim after sweep")
        .is_empty());

    let funds = harness.ledger.unclaimed_funds_for_agent("agent-1").expect("funds");
    assert_eq!(funds.len(), 1);
    assert!(funds[0].swept_at.is_some());
    assert!(funds[0].claimed_at.is_none());
}

#[tokio::test]
async fn test_funds_accumulate_until_claimed() {
    let harness = TestHarness::setup();
    escrow_thousand(&harness, "0x03").await;
    escrow_thousand(&harness, "0x04").await;

    let key = signing_key(14);
    let proof = harness.prove(&key, WalletOperation::SetCreatorWallet);
    let claimed = harness
        .ledger
        .set_creator_wallet("agent-1", &proof, Utc::now())
        .expect("claim");
    assert_eq!(claimed.funds_claimed, 2);
    assert_eq!(claimed.amount_cents, 2000);

    // Clearing the wallet sends later shares back into escrow
    let clear = harness.prove(&key, WalletOperation::ClearCreatorWallet);
    harness
        .ledger
        .clear_creator_wallet("agent-1", &clear, Utc::now())
        .expect("clear");
    escrow_thousand(&harness, "0x05").await;

    let proof = harness.prove(&key, WalletOperation::SetCreatorWallet);
    let claimed = harness
        .ledger
        .set_creator_wallet("agent-1", &proof, Utc::now())
        .expect("claim");
    assert_eq!(claimed.funds_claimed, 1);
    assert_eq!(claimed.amount_cents, 1000);
}
