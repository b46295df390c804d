use crate::{
    chains::{
        abi::{indexed, Deposited},
        DepositSource,
    },
    ledger::BalanceLedger,
    types::{ChainConfig, Deposit, EngineMetrics, LogPosition, RawDepositLog, RelayerError},
};
use alloy_sol_types::SolEvent;
use backoff::{future::retry_notify, ExponentialBackoff};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{watch, Mutex},
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

/// Where ingestion stands: the next block to request and the highest log
/// already processed.
#[derive(Debug, Default)]
struct Cursor {
    next_block: Option<u64>,
    watermark: Option<LogPosition>,
}

/// Turns custody contract `Deposited` logs into ledger credits, exactly once
/// per log position.
pub struct DepositIngestor {
    source: Arc<dyn DepositSource>,
    ledger: Arc<BalanceLedger>,
    metrics: Arc<EngineMetrics>,
    config: ChainConfig,
    // Held across timestamp lookups so batches never interleave
    cursor: Mutex<Cursor>,
    deposits: RwLock<Vec<Deposit>>,
}

impl DepositIngestor {
    pub fn new(
        source: Arc<dyn DepositSource>,
        ledger: Arc<BalanceLedger>,
        metrics: Arc<EngineMetrics>,
        config: ChainConfig,
    ) -> Self {
        Self {
            source,
            ledger,
            metrics,
            config,
            cursor: Mutex::new(Cursor::default()),
            deposits: RwLock::new(Vec::new()),
        }
    }

    /// Credit a batch of raw logs. Logs at or below the watermark are
    /// dropped, so redelivery is harmless. Returns how many were credited.
    pub async fn ingest(&self, logs: Vec<RawDepositLog>) -> usize {
        let mut cursor = self.cursor.lock().await;
        self.ingest_locked(&mut cursor, logs).await
    }

    /// Fetch and ingest the next block range up to the chain head.
    pub async fn poll_once(&self) -> Result<usize, RelayerError> {
        let mut cursor = self.cursor.lock().await;
        let head = self.source.latest_block().await?;

        let from = match cursor.next_block {
            Some(next) => next,
            None => {
                let start = self.config.start_block.unwrap_or(head);
                info!("Deposit ingestion starting at block {}", start);
                start
            }
        };
        if from > head {
            cursor.next_block = Some(from);
            return Ok(0);
        }

        let to = head.min(from.saturating_add(self.config.max_block_range.max(1) - 1));
        let logs = self.source.deposit_logs(from, to).await?;
        let credited = self.ingest_locked(&mut cursor, logs).await;
        cursor.next_block = Some(to + 1);

        Ok(credited)
    }

    /// Poll on the configured interval until `shutdown` flips. Failed polls
    /// are retried with exponential backoff; the loop itself never gives up.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Deposit ingestor started (poll interval {}ms)", self.config.poll_interval_ms);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let ingestor = &self;
            let poll = retry_notify(
                self.backoff(),
                || async move { ingestor.poll_once().await.map_err(backoff::Error::transient) },
                |e: RelayerError, wait: Duration| {
                    warn!("Deposit poll failed, retrying in {:?}: {}", wait, e);
                },
            );

            tokio::select! {
                result = poll => match result {
                    Ok(0) => {}
                    Ok(credited) => debug!("Credited {} deposits", credited),
                    Err(e) => error!("Deposit poll abandoned: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Deposit ingestor stopped");
    }

    /// Audit log of credited deposits in processing order.
    pub fn deposits(&self) -> Vec<Deposit> {
        self.deposits.read().clone()
    }

    pub async fn watermark(&self) -> Option<LogPosition> {
        self.cursor.lock().await.watermark
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.poll_interval_ms.max(1)),
            max_interval: Duration::from_secs(self.config.max_retry_interval_secs.max(1)),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn ingest_locked(&self, cursor: &mut Cursor, mut logs: Vec<RawDepositLog>) -> usize {
        logs.sort_by_key(|log| log.position);

        let mut timestamps: HashMap<u64, DateTime<Utc>> = HashMap::new();
        let mut credited = 0;

        for log in logs {
            if cursor.watermark.is_some_and(|mark| log.position <= mark) {
                debug!("Skipping already processed deposit log {}", log.position);
                continue;
            }
            cursor.watermark = Some(log.position);

            match self.resolve(&log, &mut timestamps).await {
                Ok(deposit) => {
                    self.ledger.credit(deposit.owner, deposit.token, deposit.amount);
                    info!(
                        "Deposit {} credited: {} of {} for {}",
                        deposit.position, deposit.amount, deposit.token, deposit.owner
                    );
                    self.deposits.write().push(deposit);
                    EngineMetrics::incr(&self.metrics.deposits_credited);
                    credited += 1;
                }
                Err(e) => {
                    warn!("Skipping deposit log: {}", e);
                    EngineMetrics::incr(&self.metrics.deposits_skipped);
                }
            }
        }

        credited
    }

    async fn resolve(
        &self,
        log: &RawDepositLog,
        timestamps: &mut HashMap<u64, DateTime<Utc>>,
    ) -> Result<Deposit, RelayerError> {
        let event = decode_deposit(log)?;

        let timestamp = match timestamps.get(&log.position.block) {
            Some(timestamp) => *timestamp,
            None => {
                let timestamp = self
                    .source
                    .block_timestamp(log.position.block)
                    .await
                    .map_err(|e| RelayerError::IngestionDecode {
                        position: log.position,
                        reason: format!("timestamp unavailable: {}", e),
                    })?;
                timestamps.insert(log.position.block, timestamp);
                timestamp
            }
        };

        Ok(Deposit {
            owner: event.user,
            token: event.token,
            amount: event.amount,
            timestamp,
            position: log.position,
            transaction_hash: log.transaction_hash,
        })
    }
}

fn decode_deposit(log: &RawDepositLog) -> Result<Deposited, RelayerError> {
    let decode_error = |reason: String| RelayerError::IngestionDecode {
        position: log.position,
        reason,
    };

    if log.topics.first() != Some(&Deposited::SIGNATURE_HASH) {
        return Err(decode_error("not a Deposited event".to_string()));
    }

    match log.topics.len() {
        2 => Deposited::decode_raw_log(log.topics.iter().copied(), &log.data)
            .map_err(|e| decode_error(e.to_string())),
        3 => indexed::Deposited::decode_raw_log(log.topics.iter().copied(), &log.data)
            .map(|event| Deposited {
                user: event.user,
                token: event.token,
                amount: event.amount,
            })
            .map_err(|e| decode_error(e.to_string())),
        n => Err(decode_error(format!("expected 2 or 3 topics, got {}", n))),
    }
}
