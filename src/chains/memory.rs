use super::{abi::Deposited, CustodyContract, DepositSource};
use crate::{
    authorization::SignedWithdrawal,
    types::{LogPosition, RawDepositLog, RelayerError, TransactionHash},
};
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    time::Duration,
};
use tokio::time::sleep;

const BLOCK_TIME_SECS: i64 = 12;

/// Custody contract simulated in memory: one block per pushed log, with
/// switches for reverts, failed submissions and source outages.
pub struct InMemoryChain {
    genesis: DateTime<Utc>,
    state: Mutex<ChainState>,
}

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<RawDepositLog>,
    missing_timestamps: HashSet<u64>,
    source_failures_remaining: u32,
    submission_attempts: usize,
    failing_attempts: HashSet<usize>,
    reverting_tokens: HashSet<Address>,
    submission_delay: Option<Duration>,
    receipts_unavailable: bool,
    submitted: Vec<(TransactionHash, SignedWithdrawal)>,
}

impl Default for InMemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self {
            genesis: Utc::now(),
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Mine a block holding one `Deposited` log.
    pub fn push_deposit(&self, owner: Address, token: Address, amount: U256) -> LogPosition {
        let event = Deposited {
            user: owner,
            token,
            amount,
        };
        self.push_raw_log(vec![Deposited::SIGNATURE_HASH, owner.into_word()], event.encode_data())
    }

    pub fn push_raw_log(&self, topics: Vec<B256>, data: Vec<u8>) -> LogPosition {
        let mut state = self.state.lock();
        state.head += 1;
        let position = LogPosition {
            block: state.head,
            log_index: 0,
        };
        state.logs.push(RawDepositLog {
            position,
            transaction_hash: Some(random_hash()),
            topics,
            data,
        });
        position
    }

    /// Deliver an already-mined log a second time.
    pub fn replay_log(&self, position: LogPosition) {
        let mut state = self.state.lock();
        if let Some(log) = state.logs.iter().find(|log| log.position == position).cloned() {
            state.logs.push(log);
        }
    }

    pub fn block_time(&self, block: u64) -> DateTime<Utc> {
        self.genesis + ChronoDuration::seconds(block as i64 * BLOCK_TIME_SECS)
    }

    pub fn drop_timestamp(&self, block: u64) {
        self.state.lock().missing_timestamps.insert(block);
    }

    /// The next `times` source calls fail as if the RPC were unreachable.
    pub fn fail_source(&self, times: u32) {
        self.state.lock().source_failures_remaining = times;
    }

    /// Fail the submission attempt with this zero-based index.
    pub fn fail_submission(&self, attempt: usize) {
        self.state.lock().failing_attempts.insert(attempt);
    }

    /// Simulations and submissions of this token revert.
    pub fn revert_token(&self, token: Address) {
        self.state.lock().reverting_tokens.insert(token);
    }

    pub fn clear_reverts(&self) {
        self.state.lock().reverting_tokens.clear();
    }

    /// Every confirmation waits this long before answering.
    pub fn set_submission_delay(&self, delay: Duration) {
        self.state.lock().submission_delay = Some(delay);
    }

    /// Confirmations fail as if the node lost track of the receipt.
    pub fn lose_receipts(&self) {
        self.state.lock().receipts_unavailable = true;
    }

    /// Every withdrawal the node accepted, in broadcast order.
    pub fn submitted(&self) -> Vec<(TransactionHash, SignedWithdrawal)> {
        self.state.lock().submitted.clone()
    }

    pub fn submission_attempts(&self) -> usize {
        self.state.lock().submission_attempts
    }

    fn check_source(&self) -> Result<(), RelayerError> {
        let mut state = self.state.lock();
        if state.source_failures_remaining > 0 {
            state.source_failures_remaining -= 1;
            return Err(RelayerError::Chain("connection refused".to_string()));
        }
        Ok(())
    }
}

fn random_hash() -> TransactionHash {
    TransactionHash(B256::from(rand::random::<[u8; 32]>()))
}

fn revert(withdrawal: &SignedWithdrawal, reason: &str) -> RelayerError {
    RelayerError::ChainSubmission {
        owner: withdrawal.authorization.owner,
        token: withdrawal.authorization.token,
        amount: withdrawal.authorization.amount,
        reason: reason.to_string(),
    }
}

#[async_trait]
impl DepositSource for InMemoryChain {
    async fn latest_block(&self) -> Result<u64, RelayerError> {
        self.check_source()?;
        Ok(self.state.lock().head)
    }

    async fn deposit_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawDepositLog>, RelayerError> {
        self.check_source()?;
        Ok(self
            .state
            .lock()
            .logs
            .iter()
            .filter(|log| (from_block..=to_block).contains(&log.position.block))
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, block: u64) -> Result<DateTime<Utc>, RelayerError> {
        if self.state.lock().missing_timestamps.contains(&block) {
            return Err(RelayerError::Chain(format!("Block {} not found", block)));
        }
        Ok(self.block_time(block))
    }
}

#[async_trait]
impl CustodyContract for InMemoryChain {
    async fn simulate_withdrawal(&self, withdrawal: &SignedWithdrawal) -> Result<(), RelayerError> {
        if self
            .state
            .lock()
            .reverting_tokens
            .contains(&withdrawal.authorization.token)
        {
            return Err(revert(withdrawal, "execution reverted"));
        }
        Ok(())
    }

    async fn broadcast_withdrawal(&self, withdrawal: &SignedWithdrawal) -> Result<TransactionHash, RelayerError> {
        let mut state = self.state.lock();
        let attempt = state.submission_attempts;
        state.submission_attempts += 1;

        if state.failing_attempts.contains(&attempt) {
            return Err(revert(withdrawal, "transaction dropped"));
        }

        let tx_hash = random_hash();
        state.submitted.push((tx_hash, withdrawal.clone()));
        Ok(tx_hash)
    }

    async fn confirm_withdrawal(&self, tx_hash: TransactionHash) -> Result<bool, RelayerError> {
        let delay = self.state.lock().submission_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let state = self.state.lock();
        if state.receipts_unavailable {
            return Err(RelayerError::Chain(format!("receipt for {} unavailable", tx_hash)));
        }
        let (_, withdrawal) = state
            .submitted
            .iter()
            .find(|(hash, _)| *hash == tx_hash)
            .ok_or_else(|| RelayerError::Chain(format!("unknown transaction {}", tx_hash)))?;

        Ok(!state.reverting_tokens.contains(&withdrawal.authorization.token))
    }
}
