use crate::{
    audit::{IntentAuditRecord, IntentAuditSealer},
    authorization::AuthorizationSigner,
    book::IntentBook,
    chains::{CustodyContract, DepositSource},
    ingestor::DepositIngestor,
    ledger::BalanceLedger,
    matcher::{MatchEngine, TickOutcome},
    notifications::NotificationStore,
    scheduler::spawn_periodic,
    settlement::SettlementCoordinator,
    types::{
        ClaimRequest, Deposit, EngineMetrics, Intent, IntentRequest, MatchNotification, MetricsSnapshot,
        OperationResult, ReconciliationRecord, RelayerConfig, RelayerError,
    },
};
use alloy_primitives::{Address, U256};
use chrono::Utc;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the engine: ledger, book, ingestion, matching and settlement, wired
/// to injected chain and signer implementations.
pub struct MatchingService {
    config: RelayerConfig,
    ledger: Arc<BalanceLedger>,
    book: Arc<IntentBook>,
    notifications: Arc<NotificationStore>,
    settlement: Arc<SettlementCoordinator>,
    ingestor: Arc<DepositIngestor>,
    matcher: Arc<MatchEngine>,
    metrics: Arc<EngineMetrics>,
    sealer: Option<IntentAuditSealer>,
    running: Mutex<Option<Running>>,
}

impl MatchingService {
    pub fn new(
        config: RelayerConfig,
        source: Arc<dyn DepositSource>,
        custody: Arc<dyn CustodyContract>,
        signer: Arc<dyn AuthorizationSigner>,
    ) -> Result<Self, RelayerError> {
        let ledger = Arc::new(BalanceLedger::new());
        let book = Arc::new(IntentBook::new());
        let notifications = Arc::new(NotificationStore::new());
        let metrics = Arc::new(EngineMetrics::default());

        let settlement = Arc::new(SettlementCoordinator::new(
            ledger.clone(),
            custody,
            signer,
            &config.settlement,
        ));
        let ingestor = Arc::new(DepositIngestor::new(
            source,
            ledger.clone(),
            metrics.clone(),
            config.chain.clone(),
        ));
        let matcher = Arc::new(MatchEngine::new(
            book.clone(),
            settlement.clone(),
            notifications.clone(),
            metrics.clone(),
        ));

        let sealer = match &config.audit.enclave_address {
            Some(address) => Some(IntentAuditSealer::new(address)?),
            None => None,
        };

        Ok(Self {
            config,
            ledger,
            book,
            notifications,
            settlement,
            ingestor,
            matcher,
            metrics,
            sealer,
            running: Mutex::new(None),
        })
    }

    /// Start deposit ingestion and periodic matching. Calling it again while
    /// running is a no-op.
    pub fn initialize(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(self.ingestor.clone().run(shutdown_rx.clone())),
            spawn_periodic(
                self.matcher.clone(),
                Duration::from_millis(self.config.matching.tick_interval_ms),
                shutdown_rx,
            ),
        ];

        *running = Some(Running { shutdown, tasks });
        info!("Matching service initialized");
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown.send(true);
        for task in running.tasks {
            if let Err(e) = task.await {
                error!("Background task ended abnormally: {}", e);
            }
        }
        info!("Matching service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn submit_intent(&self, request: IntentRequest) -> OperationResult {
        let now = Utc::now();
        let intent = match request.validate(now) {
            Ok(intent) => intent,
            Err(e) => {
                warn!("Rejected intent from {}: {}", request.user_address, e);
                return OperationResult::failure(e.to_string());
            }
        };

        let intent = self.book.submit(intent, now);
        EngineMetrics::incr(&self.metrics.intents_submitted);
        self.log_submission(&intent);

        OperationResult::success("Intent submitted successfully")
    }

    /// Withdraw the caller's full ledger balance of one token.
    pub async fn claim_withdrawal(&self, request: ClaimRequest) -> OperationResult {
        let (owner, token) = match request.validate() {
            Ok(parsed) => parsed,
            Err(e) => return OperationResult::failure(e.to_string()),
        };

        let amount = self.ledger.balance_of(owner, token);
        if amount.is_zero() {
            warn!("Withdrawal attempted with insufficient balance by {} for {}", owner, token);
            return OperationResult::failure("Insufficient balance");
        }

        info!("Processing withdrawal of {} {} for {}", amount, token, owner);
        match self.settlement.withdraw(owner, token, amount).await {
            Ok(tx_hash) => {
                EngineMetrics::incr(&self.metrics.withdrawals_claimed);
                OperationResult::success(format!("Withdrawal successful. Transaction hash: {}", tx_hash))
            }
            Err(e) => {
                if matches!(e, RelayerError::ReconciliationRequired { .. }) {
                    EngineMetrics::incr(&self.metrics.reconciliations);
                }
                error!("Withdrawal failed for {}: {}", owner, e);
                OperationResult::failure(format!("Withdrawal failed: {}", e))
            }
        }
    }

    pub fn get_match_notifications(&self, owner: Address) -> Vec<MatchNotification> {
        self.notifications.for_owner(owner)
    }

    pub fn intents(&self) -> Vec<Intent> {
        self.book.all()
    }

    pub fn intents_by_owner(&self, owner: Address) -> Vec<Intent> {
        self.book.by_owner(owner)
    }

    pub fn balances_of(&self, owner: Address) -> HashMap<Address, U256> {
        self.ledger.balances_of(owner)
    }

    pub fn deposits(&self) -> Vec<Deposit> {
        self.ingestor.deposits()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reconciliations(&self) -> Vec<ReconciliationRecord> {
        self.settlement.reconciliations()
    }

    pub async fn run_matching_tick(&self) -> TickOutcome {
        self.matcher.run_tick().await
    }

    /// One ingestion pass, outside the background loop.
    pub async fn poll_deposits(&self) -> Result<usize, RelayerError> {
        self.ingestor.poll_once().await
    }

    fn log_submission(&self, intent: &Intent) {
        let Some(sealer) = &self.sealer else {
            info!("New intent {} submitted by {}", intent.id, intent.owner);
            return;
        };

        match sealer.seal(&IntentAuditRecord::from(intent)) {
            Ok(sealed) => info!(
                intent = %intent.id,
                iv = %sealed.iv,
                encrypted_data = %sealed.encrypted_data,
                auth_tag = %sealed.auth_tag,
                "New intent submitted"
            ),
            Err(e) => error!("Failed to seal audit record for intent {}: {}", intent.id, e),
        }
    }
}
