use alloy_primitives::{Address, Signature, U256};
use chrono::{Duration, Utc};
use cow_relayer::{
    authorization::CustodianSigner as Signer,
    chains::memory::InMemoryChain,
    ClaimRequest, ConfigBuilder, IntentRequest, MatchingService, SigningScheme, TickOutcome,
};
use std::{sync::Arc, time::Duration as StdDuration};

const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

const ALICE: &str = "0x1111111111111111111111111111111111111111";
const BOB: &str = "0x2222222222222222222222222222222222222222";
const CAROL: &str = "0x3333333333333333333333333333333333333333";
const TOKEN_X: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const TOKEN_Y: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn addr(raw: &str) -> Address {
    raw.parse().unwrap()
}

fn setup_with(scheme: SigningScheme) -> (Arc<InMemoryChain>, Arc<MatchingService>) {
    let mut config = ConfigBuilder::defaults().unwrap();
    config.chain.start_block = Some(0);
    config.chain.poll_interval_ms = 10;
    config.matching.tick_interval_ms = 20;
    config.settlement.submission_timeout_secs = 5;

    let chain = Arc::new(InMemoryChain::new());
    let signer = Signer::from_private_key(DEV_KEY, scheme).unwrap();
    let service = MatchingService::new(config, chain.clone(), chain.clone(), Arc::new(signer)).unwrap();
    (chain, Arc::new(service))
}

fn setup() -> (Arc<InMemoryChain>, Arc<MatchingService>) {
    setup_with(SigningScheme::EthSignedMessage)
}

fn intent(user: &str, from: &str, to: &str, amount: u64, receive: u64) -> IntentRequest {
    IntentRequest {
        user_address: user.to_string(),
        token_from_address: from.to_string(),
        token_to_address: to.to_string(),
        amount: amount.to_string(),
        receive: receive.to_string(),
        expiry_time: (Utc::now() + Duration::minutes(5)).timestamp_millis(),
    }
}

async fn deposit(chain: &InMemoryChain, service: &MatchingService, user: &str, token: &str, amount: u64) {
    chain.push_deposit(addr(user), addr(token), U256::from(amount));
    service.poll_deposits().await.unwrap();
}

#[tokio::test]
async fn crossing_intents_settle_and_notify_both_owners() {
    let (chain, service) = setup();
    deposit(&chain, &service, ALICE, TOKEN_X, 100).await;
    deposit(&chain, &service, BOB, TOKEN_Y, 50).await;

    assert!(service.submit_intent(intent(ALICE, TOKEN_X, TOKEN_Y, 100, 50)).success);
    assert!(service.submit_intent(intent(BOB, TOKEN_Y, TOKEN_X, 50, 100)).success);

    let notification = match service.run_matching_tick().await {
        TickOutcome::Settled(notification) => notification,
        other => panic!("unexpected outcome: {other:?}"),
    };

    assert_eq!(service.get_match_notifications(addr(ALICE)), vec![notification.clone()]);
    assert_eq!(service.get_match_notifications(addr(BOB)), vec![notification.clone()]);
    assert!(service.intents().is_empty());

    let alice = service.balances_of(addr(ALICE));
    assert_eq!(alice.get(&addr(TOKEN_X)), Some(&U256::ZERO));
    assert_eq!(alice.get(&addr(TOKEN_Y)), Some(&U256::from(50u64)));
    let bob = service.balances_of(addr(BOB));
    assert_eq!(bob.get(&addr(TOKEN_X)), Some(&U256::from(100u64)));
    assert_eq!(bob.get(&addr(TOKEN_Y)), Some(&U256::ZERO));

    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].0, notification.receipt.first_leg);
    assert_eq!(submitted[1].0, notification.receipt.second_leg);

    let metrics = service.metrics();
    assert_eq!(metrics.matches_settled, 1);
    assert_eq!(metrics.deposits_credited, 2);
    assert_eq!(metrics.intents_submitted, 2);
}

#[tokio::test]
async fn unfunded_pair_stays_in_book() {
    let (chain, service) = setup();
    deposit(&chain, &service, ALICE, TOKEN_X, 100).await;
    deposit(&chain, &service, BOB, TOKEN_Y, 49).await;

    service.submit_intent(intent(ALICE, TOKEN_X, TOKEN_Y, 100, 50));
    service.submit_intent(intent(BOB, TOKEN_Y, TOKEN_X, 50, 100));

    assert_eq!(service.run_matching_tick().await, TickOutcome::Idle { active: 2 });
    assert_eq!(service.intents().len(), 2);
    assert!(chain.submitted().is_empty());
    assert!(service.get_match_notifications(addr(ALICE)).is_empty());

    // Topping up lets the same pair settle on a later tick
    deposit(&chain, &service, BOB, TOKEN_Y, 1).await;
    assert!(matches!(service.run_matching_tick().await, TickOutcome::Settled(_)));
}

#[tokio::test]
async fn amounts_off_by_one_never_match() {
    let (chain, service) = setup();
    deposit(&chain, &service, ALICE, TOKEN_X, 1_000).await;
    deposit(&chain, &service, BOB, TOKEN_Y, 1_000).await;

    service.submit_intent(intent(ALICE, TOKEN_X, TOKEN_Y, 100, 50));
    service.submit_intent(intent(BOB, TOKEN_Y, TOKEN_X, 50, 101));
    service.submit_intent(intent(BOB, TOKEN_Y, TOKEN_X, 51, 100));

    for _ in 0..3 {
        assert_eq!(service.run_matching_tick().await, TickOutcome::Idle { active: 3 });
    }
    assert_eq!(chain.submission_attempts(), 0);
}

#[tokio::test]
async fn first_crossing_pair_in_submission_order_wins() {
    let (chain, service) = setup();
    deposit(&chain, &service, ALICE, TOKEN_X, 100).await;
    deposit(&chain, &service, BOB, TOKEN_Y, 50).await;
    deposit(&chain, &service, CAROL, TOKEN_Y, 50).await;

    service.submit_intent(intent(ALICE, TOKEN_X, TOKEN_Y, 100, 50));
    service.submit_intent(intent(BOB, TOKEN_Y, TOKEN_X, 50, 100));
    service.submit_intent(intent(CAROL, TOKEN_Y, TOKEN_X, 50, 100));

    match service.run_matching_tick().await {
        TickOutcome::Settled(notification) => {
            assert_eq!(notification.matched_intents.intent2.owner, addr(BOB));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let remaining = service.intents();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].owner, addr(CAROL));
    assert_eq!(service.run_matching_tick().await, TickOutcome::Idle { active: 1 });
}

#[tokio::test]
async fn replayed_deposit_is_credited_once() {
    let (chain, service) = setup();
    let position = chain.push_deposit(addr(ALICE), addr(TOKEN_X), U256::from(100u64));
    chain.replay_log(position);

    service.poll_deposits().await.unwrap();
    service.poll_deposits().await.unwrap();

    assert_eq!(service.balances_of(addr(ALICE)).get(&addr(TOKEN_X)), Some(&U256::from(100u64)));
    assert_eq!(service.deposits().len(), 1);
}

#[tokio::test]
async fn second_leg_failure_leaves_ledger_untouched() {
    let (chain, service) = setup();
    deposit(&chain, &service, ALICE, TOKEN_X, 100).await;
    deposit(&chain, &service, BOB, TOKEN_Y, 50).await;
    service.submit_intent(intent(ALICE, TOKEN_X, TOKEN_Y, 100, 50));
    service.submit_intent(intent(BOB, TOKEN_Y, TOKEN_X, 50, 100));
    chain.fail_submission(1);

    let committed = match service.run_matching_tick().await {
        TickOutcome::Reconciliation { committed, .. } => committed,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(committed, vec![chain.submitted()[0].0]);

    assert_eq!(service.balances_of(addr(ALICE)).get(&addr(TOKEN_X)), Some(&U256::from(100u64)));
    assert_eq!(service.balances_of(addr(BOB)).get(&addr(TOKEN_Y)), Some(&U256::from(50u64)));
    assert!(service.intents().is_empty());
    assert!(service.get_match_notifications(addr(ALICE)).is_empty());

    let records = service.reconciliations();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].committed, committed);
    assert_eq!(service.metrics().reconciliations, 1);
}

#[tokio::test]
async fn expired_intents_are_rejected_or_swept() {
    let (chain, service) = setup();
    deposit(&chain, &service, ALICE, TOKEN_X, 100).await;
    deposit(&chain, &service, BOB, TOKEN_Y, 50).await;

    let mut stale = intent(ALICE, TOKEN_X, TOKEN_Y, 100, 50);
    stale.expiry_time = Utc::now().timestamp_millis() - 1_000;
    let result = service.submit_intent(stale);
    assert!(!result.success);

    let mut short_lived = intent(ALICE, TOKEN_X, TOKEN_Y, 100, 50);
    short_lived.expiry_time = (Utc::now() + Duration::milliseconds(50)).timestamp_millis();
    assert!(service.submit_intent(short_lived).success);
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    service.submit_intent(intent(BOB, TOKEN_Y, TOKEN_X, 50, 100));
    assert_eq!(service.run_matching_tick().await, TickOutcome::Idle { active: 1 });
    assert_eq!(service.intents().len(), 1);
    assert_eq!(service.metrics().intents_expired, 1);
}

#[tokio::test]
async fn claim_withdraws_full_balance() {
    let (chain, service) = setup();
    deposit(&chain, &service, ALICE, TOKEN_X, 75).await;

    let claim = ClaimRequest {
        user_address: ALICE.to_string(),
        token: TOKEN_X.to_string(),
    };
    let result = service.claim_withdrawal(claim.clone()).await;
    assert!(result.success, "{}", result.message);

    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 1);
    assert!(result.message.contains(&submitted[0].0.to_string()));
    assert_eq!(submitted[0].1.authorization.amount, U256::from(75u64));
    assert_eq!(service.balances_of(addr(ALICE)).get(&addr(TOKEN_X)), Some(&U256::ZERO));

    let again = service.claim_withdrawal(claim).await;
    assert!(!again.success);
    assert_eq!(again.message, "Insufficient balance");
}

#[tokio::test]
async fn failed_claim_keeps_balance() {
    let (chain, service) = setup();
    deposit(&chain, &service, ALICE, TOKEN_X, 75).await;
    chain.revert_token(addr(TOKEN_X));

    let result = service
        .claim_withdrawal(ClaimRequest {
            user_address: ALICE.to_string(),
            token: TOKEN_X.to_string(),
        })
        .await;

    assert!(!result.success);
    assert!(result.message.starts_with("Withdrawal failed"));
    assert_eq!(service.balances_of(addr(ALICE)).get(&addr(TOKEN_X)), Some(&U256::from(75u64)));
}

#[tokio::test]
async fn double_prefix_signature_recovers_to_custodian() {
    let (chain, service) = setup_with(SigningScheme::DoubleEthSignedMessage);
    deposit(&chain, &service, ALICE, TOKEN_X, 10).await;

    let result = service
        .claim_withdrawal(ClaimRequest {
            user_address: ALICE.to_string(),
            token: TOKEN_X.to_string(),
        })
        .await;
    assert!(result.success);

    let (_, withdrawal) = &chain.submitted()[0];
    let payload = Signer::signing_payload(
        SigningScheme::DoubleEthSignedMessage,
        withdrawal.authorization.message_hash(),
    );
    let signature = Signature::try_from(withdrawal.signature.as_ref()).unwrap();
    assert_eq!(
        signature.recover_address_from_msg(payload.as_slice()).unwrap(),
        addr("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
    );
}

#[tokio::test]
async fn background_tasks_ingest_and_match_until_shutdown() {
    let (chain, service) = setup();
    service.initialize();
    service.initialize();
    assert!(service.is_running());

    chain.push_deposit(addr(ALICE), addr(TOKEN_X), U256::from(100u64));
    chain.push_deposit(addr(BOB), addr(TOKEN_Y), U256::from(50u64));
    service.submit_intent(intent(ALICE, TOKEN_X, TOKEN_Y, 100, 50));
    service.submit_intent(intent(BOB, TOKEN_Y, TOKEN_X, 50, 100));

    let mut matched = false;
    for _ in 0..150 {
        if !service.get_match_notifications(addr(BOB)).is_empty() {
            matched = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }

    service.shutdown().await;
    assert!(matched);
    assert!(!service.is_running());
    assert_eq!(chain.submitted().len(), 2);

    // Shutdown twice is harmless
    service.shutdown().await;
}
