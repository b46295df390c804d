use crate::{
    book::IntentBook,
    notifications::NotificationStore,
    scheduler::PeriodicTask,
    settlement::SettlementCoordinator,
    types::{EngineMetrics, MatchNotification, RelayerError, TransactionHash},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a single matching tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running
    Skipped,
    /// No crossing pair could be settled
    Idle { active: usize },
    Settled(MatchNotification),
    /// Settlement failed before anything landed; the intents stay in the book
    Failed { intents: (Uuid, Uuid), reason: String },
    /// A leg landed without its counterpart; the intents were pulled
    Reconciliation {
        intents: (Uuid, Uuid),
        committed: Vec<TransactionHash>,
    },
}

/// Periodic coincidence-of-wants matcher over the intent book
pub struct MatchEngine {
    book: Arc<IntentBook>,
    settlement: Arc<SettlementCoordinator>,
    notifications: Arc<NotificationStore>,
    metrics: Arc<EngineMetrics>,
    tick_guard: Mutex<()>,
}

impl MatchEngine {
    pub fn new(
        book: Arc<IntentBook>,
        settlement: Arc<SettlementCoordinator>,
        notifications: Arc<NotificationStore>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            book,
            settlement,
            notifications,
            metrics,
            tick_guard: Mutex::new(()),
        }
    }

    pub async fn run_tick(&self) -> TickOutcome {
        self.run_tick_at(Utc::now()).await
    }

    /// One matching pass as of `now`: sweep, scan in insertion order, settle
    /// at most one pair.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("Matching tick still in progress, skipping");
            EngineMetrics::incr(&self.metrics.ticks_skipped);
            return TickOutcome::Skipped;
        };
        EngineMetrics::incr(&self.metrics.ticks_run);

        let expired = self.book.sweep_expired(now);
        EngineMetrics::add(&self.metrics.intents_expired, expired as u64);

        let active = self.book.active_intents(now);
        debug!("Matching over {} active intents", active.len());

        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                if !a.crosses(b) {
                    continue;
                }
                debug!("Found matching intents {} and {}", a.id, b.id);

                match self.settlement.settle(a, b).await {
                    Ok(receipt) => {
                        self.book.remove(&[a.id, b.id]);
                        let notification = MatchNotification::new(a.clone(), b.clone(), receipt);
                        self.notifications.record(notification.clone());
                        EngineMetrics::incr(&self.metrics.matches_settled);

                        info!(
                            "Matched {} ({} {} -> {}) with {} ({} {} -> {})",
                            a.owner, a.amount_offered, a.token_offered, a.token_wanted,
                            b.owner, b.amount_offered, b.token_offered, b.token_wanted
                        );
                        return TickOutcome::Settled(notification);
                    }
                    Err(RelayerError::InsufficientBalance { owner, token, required, available }) => {
                        debug!(
                            "Skipping {} / {}: {} holds {} of {}, needs {}",
                            a.id, b.id, owner, available, token, required
                        );
                    }
                    Err(RelayerError::ReconciliationRequired { reason, committed }) => {
                        self.book.remove(&[a.id, b.id]);
                        EngineMetrics::incr(&self.metrics.reconciliations);
                        error!("Match {} / {} pulled for reconciliation: {}", a.id, b.id, reason);
                        return TickOutcome::Reconciliation {
                            intents: (a.id, b.id),
                            committed,
                        };
                    }
                    Err(e) => {
                        EngineMetrics::incr(&self.metrics.settlement_failures);
                        warn!("Settlement of {} / {} failed, retrying next tick: {}", a.id, b.id, e);
                        return TickOutcome::Failed {
                            intents: (a.id, b.id),
                            reason: e.to_string(),
                        };
                    }
                }
            }
        }

        TickOutcome::Idle { active: active.len() }
    }
}

#[async_trait]
impl PeriodicTask for MatchEngine {
    fn name(&self) -> &'static str {
        "intent matcher"
    }

    async fn run_once(&self) {
        self.run_tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authorization::CustodianSigner,
        chains::memory::InMemoryChain,
        ledger::BalanceLedger,
        types::{Intent, SettlementConfig, SigningScheme},
    };
    use alloy_primitives::{Address, U256};
    use chrono::Duration;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    struct Fixture {
        chain: Arc<InMemoryChain>,
        ledger: Arc<BalanceLedger>,
        book: Arc<IntentBook>,
        notifications: Arc<NotificationStore>,
        engine: Arc<MatchEngine>,
    }

    fn fixture() -> Fixture {
        fixture_with_timeout(5)
    }

    fn fixture_with_timeout(submission_timeout_secs: u64) -> Fixture {
        let chain = Arc::new(InMemoryChain::new());
        let ledger = Arc::new(BalanceLedger::new());
        let book = Arc::new(IntentBook::new());
        let notifications = Arc::new(NotificationStore::new());
        let signer = CustodianSigner::from_private_key(DEV_KEY, SigningScheme::EthSignedMessage).unwrap();
        let settlement = Arc::new(SettlementCoordinator::new(
            ledger.clone(),
            chain.clone(),
            Arc::new(signer),
            &SettlementConfig {
                submission_timeout_secs,
                simulate_before_submit: true,
            },
        ));
        let engine = Arc::new(MatchEngine::new(
            book.clone(),
            settlement,
            notifications.clone(),
            Arc::new(EngineMetrics::default()),
        ));
        Fixture { chain, ledger, book, notifications, engine }
    }

    fn user(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn x() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn y() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn submit(book: &IntentBook, owner: Address, from: Address, to: Address, amount: u64, receive: u64) -> Intent {
        let now = Utc::now();
        book.submit(
            Intent::new(owner, from, to, U256::from(amount), U256::from(receive), now + Duration::minutes(5), now),
            now,
        )
    }

    #[tokio::test]
    async fn test_crossing_pair_settles() {
        let f = fixture();
        f.ledger.credit(user(1), x(), U256::from(100u64));
        f.ledger.credit(user(2), y(), U256::from(50u64));
        let a = submit(&f.book, user(1), x(), y(), 100, 50);
        let b = submit(&f.book, user(2), y(), x(), 50, 100);

        let outcome = f.engine.run_tick().await;
        let notification = match outcome {
            TickOutcome::Settled(notification) => notification,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(notification.matched_intents.intent1.id, a.id);
        assert_eq!(notification.matched_intents.intent2.id, b.id);
        assert!(f.book.is_empty());
        assert_eq!(f.notifications.for_owner(user(1)), vec![notification.clone()]);
        assert_eq!(f.notifications.for_owner(user(2)), vec![notification]);

        assert_eq!(f.engine.run_tick().await, TickOutcome::Idle { active: 0 });
    }

    #[tokio::test]
    async fn test_unfunded_pair_skipped_for_next_candidate() {
        let f = fixture();
        f.ledger.credit(user(1), x(), U256::from(100u64));
        f.ledger.credit(user(3), y(), U256::from(50u64));
        // user 2 has no balance: (a, b) is blocked but (a, c) can settle
        let a = submit(&f.book, user(1), x(), y(), 100, 50);
        let b = submit(&f.book, user(2), y(), x(), 50, 100);
        let c = submit(&f.book, user(3), y(), x(), 50, 100);

        match f.engine.run_tick().await {
            TickOutcome::Settled(notification) => {
                assert_eq!(notification.matched_intents.intent1.id, a.id);
                assert_eq!(notification.matched_intents.intent2.id, c.id);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(f.book.all().iter().map(|i| i.id).collect::<Vec<_>>(), vec![b.id]);
    }

    #[tokio::test]
    async fn test_near_miss_never_matches() {
        let f = fixture();
        f.ledger.credit(user(1), x(), U256::from(100u64));
        f.ledger.credit(user(2), y(), U256::from(50u64));
        submit(&f.book, user(1), x(), y(), 100, 50);
        submit(&f.book, user(2), y(), x(), 49, 100);

        assert_eq!(f.engine.run_tick().await, TickOutcome::Idle { active: 2 });
        assert_eq!(f.chain.submission_attempts(), 0);
    }

    #[tokio::test]
    async fn test_failed_settlement_keeps_intents_for_retry() {
        let f = fixture();
        f.ledger.credit(user(1), x(), U256::from(100u64));
        f.ledger.credit(user(2), y(), U256::from(50u64));
        submit(&f.book, user(1), x(), y(), 100, 50);
        submit(&f.book, user(2), y(), x(), 50, 100);
        f.chain.revert_token(x());

        assert!(matches!(f.engine.run_tick().await, TickOutcome::Failed { .. }));
        assert_eq!(f.book.len(), 2);

        f.chain.clear_reverts();
        assert!(matches!(f.engine.run_tick().await, TickOutcome::Settled(_)));
    }

    #[tokio::test]
    async fn test_reconciliation_pulls_intents() {
        let f = fixture();
        f.ledger.credit(user(1), x(), U256::from(100u64));
        f.ledger.credit(user(2), y(), U256::from(50u64));
        submit(&f.book, user(1), x(), y(), 100, 50);
        submit(&f.book, user(2), y(), x(), 50, 100);
        f.chain.fail_submission(1);

        match f.engine.run_tick().await {
            TickOutcome::Reconciliation { committed, .. } => assert_eq!(committed.len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(f.book.is_empty());
        assert!(f.notifications.for_owner(user(1)).is_empty());
        assert_eq!(f.ledger.balance_of(user(1), x()), U256::from(100u64));
    }

    #[tokio::test]
    async fn test_expired_intents_swept_before_matching() {
        let f = fixture();
        f.ledger.credit(user(1), x(), U256::from(100u64));
        f.ledger.credit(user(2), y(), U256::from(50u64));
        submit(&f.book, user(1), x(), y(), 100, 50);
        submit(&f.book, user(2), y(), x(), 50, 100);

        let after_expiry = Utc::now() + Duration::minutes(10);
        assert_eq!(f.engine.run_tick_at(after_expiry).await, TickOutcome::Idle { active: 0 });
        assert!(f.book.is_empty());
        assert_eq!(f.engine.metrics.snapshot().intents_expired, 2);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let f = fixture();
        f.ledger.credit(user(1), x(), U256::from(100u64));
        f.ledger.credit(user(2), y(), U256::from(50u64));
        submit(&f.book, user(1), x(), y(), 100, 50);
        submit(&f.book, user(2), y(), x(), 50, 100);
        f.chain.set_submission_delay(std::time::Duration::from_millis(300));

        let engine = f.engine.clone();
        let running = tokio::spawn(async move { engine.run_tick().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(f.engine.run_tick().await, TickOutcome::Skipped);
        assert!(matches!(running.await.unwrap(), TickOutcome::Settled(_)));
        assert_eq!(f.engine.metrics.snapshot().ticks_skipped, 1);
    }

    #[tokio::test]
    async fn test_stalled_receipt_pulls_pair_instead_of_resending() {
        let f = fixture_with_timeout(1);
        f.ledger.credit(user(1), x(), U256::from(100u64));
        f.ledger.credit(user(2), y(), U256::from(50u64));
        let a = submit(&f.book, user(1), x(), y(), 100, 50);
        let b = submit(&f.book, user(2), y(), x(), 50, 100);
        f.chain.set_submission_delay(std::time::Duration::from_secs(2));

        match f.engine.run_tick().await {
            TickOutcome::Reconciliation { intents, committed } => {
                assert_eq!(intents, (a.id, b.id));
                assert_eq!(committed, vec![f.chain.submitted()[0].0]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // The broadcast leg is never sent a second time
        assert!(f.book.is_empty());
        assert_eq!(f.engine.run_tick().await, TickOutcome::Idle { active: 0 });
        assert_eq!(f.chain.submission_attempts(), 1);
        assert_eq!(f.ledger.balance_of(user(1), x()), U256::from(100u64));
        assert_eq!(f.engine.metrics.snapshot().reconciliations, 1);
    }
}
