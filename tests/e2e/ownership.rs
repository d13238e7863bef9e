//! Wallet ownership proofs gating wallet changes.

use super::harness::{personal_sign, signing_key, wallet_of, TestHarness};
use chrono::Utc;
use x402_tipjar::ledger::{PayoutStatus, RecipientKind};
use x402_tipjar::payment::TipOutcome;
use x402_tipjar::{Error, WalletOperation};

#[tokio::test]
async fn test_proven_creator_wallet_claims_escrow() {
    let harness = TestHarness::setup();
    let TipOutcome::Credited(receipt) = harness.tip(1250, "0x01").await.expect("credit") else {
        panic!("expected credit");
    };
    receipt.settlement.await.expect("settle");

    let key = signing_key(3);
    let wallet = wallet_of(&key);
    let ownership = harness.ownership();
    let now = Utc::now();

    let challenge = ownership
        .generate_nonce("agent-1", &wallet, WalletOperation::SetCreatorWallet, now)
        .expect("challenge");
    let signature = personal_sign(&key, &challenge.message);
    let proof = ownership
        .verify("agent-1", &signature, &challenge.message, now)
        .expect("proof");
    assert_eq!(proof.wallet().to_string(), wallet);

    let claimed = harness
        .ledger
        .set_creator_wallet("agent-1", &proof, now)
        .expect("set creator wallet");
    assert_eq!(claimed.amount_cents, 1000);
    assert_eq!(
        harness.ledger.agent("agent-1").expect("q").expect("agent").creator_wallet,
        Some(wallet.clone())
    );

    // Nonces are single use
    assert!(matches!(
        ownership.verify("agent-1", &signature, &challenge.message, now),
        Err(Error::Ownership(_))
    ));

    // Later creator shares go straight to the wallet
    let TipOutcome::Credited(receipt) = harness.tip(250, "0x02").await.expect("credit") else {
        panic!("expected credit");
    };
    assert!(!receipt.escrowed);
    let creator = harness
        .ledger
        .payout_entries_for_tip(&receipt.tip_vote_id)
        .expect("entries")
        .into_iter()
        .find(|e| e.recipient_kind == RecipientKind::Creator)
        .expect("creator entry");
    assert_eq!(creator.status, PayoutStatus::Pending);
    assert_eq!(creator.recipient_address.as_deref(), Some(wallet.as_str()));
}

#[tokio::test]
async fn test_proof_bound_to_operation_and_signer() {
    let harness = TestHarness::setup();
    let ownership = harness.ownership();
    let key = signing_key(4);
    let wallet = wallet_of(&key);
    let now = Utc::now();

    let challenge = ownership
        .generate_nonce("agent-1", &wallet, WalletOperation::ReregisterAgentWallet, now)
        .expect("challenge");

    let imposter = signing_key(5);
    assert!(matches!(
        ownership.verify(
            "agent-1",
            &personal_sign(&imposter, &challenge.message),
            &challenge.message,
            now
        ),
        Err(Error::Ownership(_))
    ));

    let proof = ownership
        .verify("agent-1", &personal_sign(&key, &challenge.message), &challenge.message, now)
        .expect("proof");
    assert!(matches!(
        harness.ledger.set_creator_wallet("agent-1", &proof, now),
        Err(Error::Ownership(_))
    ));
    harness
        .ledger
        .reregister_agent_wallet("agent-1", &proof, now)
        .expect("reregister");
    assert_eq!(
        harness.ledger.agent("agent-1").expect("q").expect("agent").agent_wallet,
        Some(wallet)
    );
}

#[tokio::test]
async fn test_agent_wallet_is_write_once() {
    let harness = TestHarness::setup();
    let first = "0x6666666666666666666666666666666666666666";
    let second = "0x7777777777777777777777777777777777777777";
    let now = Utc::now();

    harness.ledger.set_agent_wallet("agent-1", first, now).expect("set");
    harness.ledger.set_agent_wallet("agent-1", first, now).expect("same wallet");
    assert!(matches!(
        harness.ledger.set_agent_wallet("agent-1", second, now),
        Err(Error::WalletImmutable { .. })
    ));
}

#[tokio::test]
async fn test_creator_wallet_replacement_needs_current_holder() {
    let harness = TestHarness::setup();
    let owner = signing_key(6);
    let attacker = signing_key(7);
    let now = Utc::now();

    let proof = harness.prove(&owner, WalletOperation::SetCreatorWallet);
    harness.ledger.set_creator_wallet("agent-1", &proof, now).expect("set");

    let takeover = harness.prove(&attacker, WalletOperation::SetCreatorWallet);
    assert!(matches!(
        harness.ledger.set_creator_wallet("agent-1", &takeover, now),
        Err(Error::Ownership(_))
    ));
    assert_eq!(
        harness.ledger.agent("agent-1").expect("q").expect("agent").creator_wallet,
        Some(wallet_of(&owner))
    );
}

#[tokio::test]
async fn test_cleared_creator_wallet_escrows_again() {
    let harness = TestHarness::setup();
    let owner = signing_key(8);
    let now = Utc::now();

    let proof = harness.prove(&owner, WalletOperation::SetCreatorWallet);
    harness.ledger.set_creator_wallet("agent-1", &proof, now).expect("set");

    let foreign = harness.prove(&signing_key(9), WalletOperation::ClearCreatorWallet);
    assert!(matches!(
        harness.ledger.clear_creator_wallet("agent-1", &foreign, now),
        Err(Error::Ownership(_))
    ));

    let clear = harness.prove(&owner, WalletOperation::ClearCreatorWallet);
    harness.ledger.clear_creator_wallet("agent-1", &clear, now).expect("clear");
    assert!(harness
        .ledger
        .agent("agent-1")
        .expect("q")
        .expect("agent")
        .creator_wallet
        .is_none());

    let TipOutcome::Credited(receipt) = harness.tip(1250, "0x03").await.expect("credit") else {
        panic!("expected credit");
    };
    assert!(receipt.escrowed);
    receipt.settlement.await.expect("settle");
    assert_eq!(harness.ledger.unclaimed_balance("agent-1").expect("balance"), 1000);

    let elsewhere = "0x8888888888888888888888888888888888888888";
    assert!(matches!(
        harness.ledger.claim("agent-1", elsewhere, now),
        Err(Error::Ownership(_))
    ));
    assert!(matches!(
        harness.ledger.claim("agent-1", &wallet_of(&owner), now),
        Err(Error::Ownership(_))
    ));
    assert_eq!(harness.ledger.unclaimed_balance("agent-1").expect("balance"), 1000);
}
