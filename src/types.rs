use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use uuid::Uuid;

/// Core relayer types: intents, deposits, match records, configuration and errors

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub B256);

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serde adapter writing `U256` token amounts as base-10 strings.
pub mod decimal {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_str_radix(raw.trim(), 10).map_err(serde::de::Error::custom)
    }
}

/// Position of a log in the chain: ordered by block, then by log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    pub block: u64,
    pub log_index: u64,
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.log_index)
    }
}

/// Intent as submitted over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRequest {
    pub user_address: String,
    pub token_from_address: String,
    pub token_to_address: String,
    /// Amount offered, base units, decimal string
    pub amount: String,
    /// Amount wanted in return, base units, decimal string
    pub receive: String,
    /// Unix milliseconds
    pub expiry_time: i64,
}

impl IntentRequest {
    /// Structural validation; produces a book-ready intent stamped with `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<Intent, RelayerError> {
        let owner = parse_address("userAddress", &self.user_address)?;
        let token_offered = parse_address("tokenFromAddress", &self.token_from_address)?;
        let token_wanted = parse_address("tokenToAddress", &self.token_to_address)?;
        let amount_offered = parse_amount("amount", &self.amount)?;
        let amount_wanted = parse_amount("receive", &self.receive)?;

        if token_offered == token_wanted {
            return Err(RelayerError::Validation(
                "tokenFromAddress and tokenToAddress must differ".to_string(),
            ));
        }

        let expires_at = Utc
            .timestamp_millis_opt(self.expiry_time)
            .single()
            .ok_or_else(|| RelayerError::Validation(format!("Invalid expiryTime: {}", self.expiry_time)))?;

        if expires_at <= now {
            return Err(RelayerError::Validation("Intent is already expired".to_string()));
        }

        Ok(Intent::new(
            owner,
            token_offered,
            token_wanted,
            amount_offered,
            amount_wanted,
            expires_at,
            now,
        ))
    }
}

/// Direct withdrawal request for the full balance of one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub user_address: String,
    pub token: String,
}

impl ClaimRequest {
    pub fn validate(&self) -> Result<(Address, Address), RelayerError> {
        Ok((
            parse_address("userAddress", &self.user_address)?,
            parse_address("token", &self.token)?,
        ))
    }
}

pub fn parse_address(field: &str, raw: &str) -> Result<Address, RelayerError> {
    let raw = raw.trim();
    if !raw.starts_with("0x") {
        return Err(RelayerError::Validation(format!("{} must be a 0x-prefixed address", field)));
    }
    raw.parse::<Address>()
        .map_err(|e| RelayerError::Validation(format!("Invalid {}: {}", field, e)))
}

fn parse_amount(field: &str, raw: &str) -> Result<U256, RelayerError> {
    let amount = U256::from_str_radix(raw.trim(), 10)
        .map_err(|e| RelayerError::Validation(format!("Invalid {}: {}", field, e)))?;
    if amount.is_zero() {
        return Err(RelayerError::Validation(format!("{} must be greater than 0", field)));
    }
    Ok(amount)
}

/// A swap intent held in the book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub id: Uuid,
    pub owner: Address,
    pub token_offered: Address,
    pub token_wanted: Address,
    #[serde(with = "decimal")]
    pub amount_offered: U256,
    #[serde(with = "decimal")]
    pub amount_wanted: U256,
    pub expires_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

impl Intent {
    pub fn new(
        owner: Address,
        token_offered: Address,
        token_wanted: Address,
        amount_offered: U256,
        amount_wanted: U256,
        expires_at: DateTime<Utc>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            token_offered,
            token_wanted,
            amount_offered,
            amount_wanted,
            expires_at,
            submitted_at,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Exact coincidence of wants: tokens and amounts are each other's inverse.
    pub fn crosses(&self, other: &Intent) -> bool {
        self.token_wanted == other.token_offered
            && self.token_offered == other.token_wanted
            && self.amount_offered == other.amount_wanted
            && other.amount_offered == self.amount_wanted
    }
}

/// Undecoded `Deposited` log as delivered by a deposit source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDepositLog {
    pub position: LogPosition,
    pub transaction_hash: Option<TransactionHash>,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

/// Credited deposit, kept for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub owner: Address,
    pub token: Address,
    #[serde(with = "decimal")]
    pub amount: U256,
    pub timestamp: DateTime<Utc>,
    pub position: LogPosition,
    pub transaction_hash: Option<TransactionHash>,
}

/// One transaction hash per settlement leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub first_leg: TransactionHash,
    pub second_leg: TransactionHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedIntents {
    pub intent1: Intent,
    pub intent2: Intent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchNotification {
    pub matched_intents: MatchedIntents,
    pub receipt: SettlementReceipt,
    pub completed_at: DateTime<Utc>,
}

impl MatchNotification {
    pub fn new(intent1: Intent, intent2: Intent, receipt: SettlementReceipt) -> Self {
        Self {
            matched_intents: MatchedIntents { intent1, intent2 },
            receipt,
            completed_at: Utc::now(),
        }
    }
}

/// Settlement whose chain side and ledger side diverged
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRecord {
    /// Absent for direct withdrawals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_intents: Option<MatchedIntents>,
    pub committed: Vec<TransactionHash>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Result returned across the service boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// How the withdrawal message hash is turned into the signed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningScheme {
    /// Sign `keccak256(packed)` with one EIP-191 prefix.
    EthSignedMessage,
    /// Apply the EIP-191 digest first, then sign that digest with another
    /// prefix. What the deployed custody contract verifies.
    #[default]
    DoubleEthSignedMessage,
}

/// Relayer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    pub chain: ChainConfig,
    pub matching: MatchingConfig,
    pub settlement: SettlementConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub contract_address: String,
    pub private_key: String,
    pub poll_interval_ms: u64,
    pub start_block: Option<u64>,
    pub max_block_range: u64,
    pub max_retry_interval_secs: u64,
    pub signing_scheme: SigningScheme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub submission_timeout_secs: u64,
    pub simulate_before_submit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enclave address the audit key is derived from; plain logging when unset
    pub enclave_address: Option<String>,
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Insufficient balance for {owner} in {token}: required {required}, available {available}")]
    InsufficientBalance {
        owner: Address,
        token: Address,
        required: U256,
        available: U256,
    },

    #[error("Signing failed for {owner} withdrawing {amount} of {token}: {reason}")]
    SignatureFailure {
        owner: Address,
        token: Address,
        amount: U256,
        reason: String,
    },

    #[error("Chain submission failed for {owner} withdrawing {amount} of {token}: {reason}")]
    ChainSubmission {
        owner: Address,
        token: Address,
        amount: U256,
        reason: String,
    },

    #[error("Undecodable deposit event at {position}: {reason}")]
    IngestionDecode { position: LogPosition, reason: String },

    #[error("Settlement needs manual reconciliation: {reason}")]
    ReconciliationRequired {
        reason: String,
        committed: Vec<TransactionHash>,
    },

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Audit record error: {0}")]
    Audit(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RelayerError {
    /// Whether the same operation may be attempted again without manual action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainSubmission { .. } | RelayerError::Chain(_)
        )
    }
}

impl From<serde_json::Error> for RelayerError {
    fn from(err: serde_json::Error) -> Self {
        RelayerError::Validation(err.to_string())
    }
}

/// Counters for monitoring
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub intents_submitted: AtomicU64,
    pub intents_expired: AtomicU64,
    pub ticks_run: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub matches_settled: AtomicU64,
    pub settlement_failures: AtomicU64,
    pub reconciliations: AtomicU64,
    pub deposits_credited: AtomicU64,
    pub deposits_skipped: AtomicU64,
    pub withdrawals_claimed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub intents_submitted: u64,
    pub intents_expired: u64,
    pub ticks_run: u64,
    pub ticks_skipped: u64,
    pub matches_settled: u64,
    pub settlement_failures: u64,
    pub reconciliations: u64,
    pub deposits_credited: u64,
    pub deposits_skipped: u64,
    pub withdrawals_claimed: u64,
}

impl EngineMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            intents_submitted: self.intents_submitted.load(Ordering::Relaxed),
            intents_expired: self.intents_expired.load(Ordering::Relaxed),
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            matches_settled: self.matches_settled.load(Ordering::Relaxed),
            settlement_failures: self.settlement_failures.load(Ordering::Relaxed),
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
            deposits_credited: self.deposits_credited.load(Ordering::Relaxed),
            deposits_skipped: self.deposits_skipped.load(Ordering::Relaxed),
            withdrawals_claimed: self.withdrawals_claimed.load(Ordering::Relaxed),
        }
    }
}
