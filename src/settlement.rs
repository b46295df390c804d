use crate::{
    authorization::{AuthorizationSigner, SignedWithdrawal, WithdrawalAuthorization},
    chains::CustodyContract,
    ledger::{BalanceChange, BalanceLedger},
    types::{
        Intent, MatchedIntents, ReconciliationRecord, RelayerError, SettlementConfig, SettlementReceipt,
        TransactionHash,
    },
};
use alloy_primitives::{Address, U256};
use chrono::Utc;
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info};

/// Why a leg did not complete
enum LegFailure {
    /// Nothing moved: the node refused it, or it reverted on chain.
    Rejected(RelayerError),
    /// The node accepted the transaction but its outcome is unknown.
    InDoubt {
        tx_hash: Option<TransactionHash>,
        reason: String,
    },
}

/// Converts a crossing pair (or a direct claim) into signed custody
/// withdrawals and the matching ledger mutation.
///
/// Settlement is two-phase: both legs are signed and simulated before either
/// is sent, and the ledger only changes after every leg has landed. A leg that
/// lands without its counterpart cannot be rolled back and is surfaced as
/// `ReconciliationRequired`.
pub struct SettlementCoordinator {
    ledger: Arc<BalanceLedger>,
    custody: Arc<dyn CustodyContract>,
    signer: Arc<dyn AuthorizationSigner>,
    submission_timeout: Duration,
    simulate: bool,
    reconciliations: RwLock<Vec<ReconciliationRecord>>,
}

impl SettlementCoordinator {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        custody: Arc<dyn CustodyContract>,
        signer: Arc<dyn AuthorizationSigner>,
        config: &SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            custody,
            signer,
            submission_timeout: Duration::from_secs(config.submission_timeout_secs),
            simulate: config.simulate_before_submit,
            reconciliations: RwLock::new(Vec::new()),
        }
    }

    pub async fn settle(&self, a: &Intent, b: &Intent) -> Result<SettlementReceipt, RelayerError> {
        self.ledger.ensure_covers(&[
            (a.owner, a.token_offered, a.amount_offered),
            (b.owner, b.token_offered, b.amount_offered),
        ])?;

        let first = self.authorize(a.owner, a.token_offered, a.amount_offered).await?;
        let second = self.authorize(b.owner, b.token_offered, b.amount_offered).await?;

        if self.simulate {
            self.custody.simulate_withdrawal(&first).await?;
            self.custody.simulate_withdrawal(&second).await?;
            debug!("Both legs of {} / {} simulated", a.id, b.id);
        }

        let first_leg = match self.submit(&first).await {
            Ok(tx_hash) => tx_hash,
            Err(LegFailure::Rejected(e)) => return Err(e),
            Err(LegFailure::InDoubt { tx_hash, reason }) => {
                return Err(self.reconcile(
                    Some((a, b)),
                    tx_hash.into_iter().collect(),
                    format!("first leg outcome unknown: {}", reason),
                ))
            }
        };
        let second_leg = match self.submit(&second).await {
            Ok(tx_hash) => tx_hash,
            Err(failure) => {
                let mut committed = vec![first_leg];
                let reason = match failure {
                    LegFailure::Rejected(e) => e.to_string(),
                    LegFailure::InDoubt { tx_hash, reason } => {
                        committed.extend(tx_hash);
                        reason
                    }
                };
                return Err(self.reconcile(
                    Some((a, b)),
                    committed,
                    format!("second leg failed after first leg {} landed: {}", first_leg, reason),
                ));
            }
        };

        let changes = [
            BalanceChange::Debit { owner: a.owner, token: a.token_offered, amount: a.amount_offered },
            BalanceChange::Credit { owner: a.owner, token: a.token_wanted, amount: a.amount_wanted },
            BalanceChange::Debit { owner: b.owner, token: b.token_offered, amount: b.amount_offered },
            BalanceChange::Credit { owner: b.owner, token: b.token_wanted, amount: b.amount_wanted },
        ];
        if let Err(e) = self.ledger.apply(&changes) {
            return Err(self.reconcile(
                Some((a, b)),
                vec![first_leg, second_leg],
                format!("ledger changed while legs were in flight: {}", e),
            ));
        }

        info!(
            "Settled {} / {}: legs {} and {}",
            a.id, b.id, first_leg, second_leg
        );

        Ok(SettlementReceipt { first_leg, second_leg })
    }

    /// Withdraw exactly `amount` of `token` to `owner` from custody.
    pub async fn withdraw(&self, owner: Address, token: Address, amount: U256) -> Result<TransactionHash, RelayerError> {
        if amount.is_zero() {
            return Err(RelayerError::InsufficientBalance {
                owner,
                token,
                required: amount,
                available: self.ledger.balance_of(owner, token),
            });
        }
        self.ledger.ensure_covers(&[(owner, token, amount)])?;

        let withdrawal = self.authorize(owner, token, amount).await?;
        if self.simulate {
            self.custody.simulate_withdrawal(&withdrawal).await?;
        }
        let tx_hash = match self.submit(&withdrawal).await {
            Ok(tx_hash) => tx_hash,
            Err(LegFailure::Rejected(e)) => return Err(e),
            Err(LegFailure::InDoubt { tx_hash, reason }) => {
                return Err(self.reconcile(
                    None,
                    tx_hash.into_iter().collect(),
                    format!("withdrawal outcome unknown: {}", reason),
                ))
            }
        };

        if let Err(e) = self.ledger.debit(owner, token, amount) {
            return Err(self.reconcile(
                None,
                vec![tx_hash],
                format!("withdrawal landed but balance was consumed in the meantime: {}", e),
            ));
        }

        info!("Withdrew {} of {} for {} in {}", amount, token, owner, tx_hash);
        Ok(tx_hash)
    }

    pub fn reconciliations(&self) -> Vec<ReconciliationRecord> {
        self.reconciliations.read().clone()
    }

    async fn authorize(&self, owner: Address, token: Address, amount: U256) -> Result<SignedWithdrawal, RelayerError> {
        let authorization = WithdrawalAuthorization::new(owner, token, amount);
        let signature = self
            .signer
            .sign(authorization.message_hash())
            .await
            .map_err(|e| RelayerError::SignatureFailure {
                owner,
                token,
                amount,
                reason: e.to_string(),
            })?;

        Ok(SignedWithdrawal { authorization, signature })
    }

    /// Broadcast one leg and wait for its receipt, both within the
    /// submission deadline.
    async fn submit(&self, withdrawal: &SignedWithdrawal) -> Result<TransactionHash, LegFailure> {
        let deadline = Instant::now() + self.submission_timeout;

        let tx_hash = match timeout_at(deadline, self.custody.broadcast_withdrawal(withdrawal)).await {
            Ok(Ok(tx_hash)) => tx_hash,
            Ok(Err(e)) => return Err(LegFailure::Rejected(e)),
            Err(_) => {
                return Err(LegFailure::InDoubt {
                    tx_hash: None,
                    reason: format!("broadcast not acknowledged within {:?}", self.submission_timeout),
                })
            }
        };

        match timeout_at(deadline, self.custody.confirm_withdrawal(tx_hash)).await {
            Ok(Ok(true)) => Ok(tx_hash),
            Ok(Ok(false)) => Err(LegFailure::Rejected(RelayerError::ChainSubmission {
                owner: withdrawal.authorization.owner,
                token: withdrawal.authorization.token,
                amount: withdrawal.authorization.amount,
                reason: format!("transaction {} reverted", tx_hash),
            })),
            Ok(Err(e)) => Err(LegFailure::InDoubt {
                tx_hash: Some(tx_hash),
                reason: format!("receipt for {} unavailable: {}", tx_hash, e),
            }),
            Err(_) => Err(LegFailure::InDoubt {
                tx_hash: Some(tx_hash),
                reason: format!("no receipt for {} within {:?}", tx_hash, self.submission_timeout),
            }),
        }
    }

    fn reconcile(&self, intents: Option<(&Intent, &Intent)>, committed: Vec<TransactionHash>, reason: String) -> RelayerError {
        error!("Reconciliation required: {} (committed: {:?})", reason, committed);

        self.reconciliations.write().push(ReconciliationRecord {
            matched_intents: intents.map(|(a, b)| MatchedIntents {
                intent1: a.clone(),
                intent2: b.clone(),
            }),
            committed: committed.clone(),
            reason: reason.clone(),
            recorded_at: Utc::now(),
        });

        RelayerError::ReconciliationRequired { reason, committed }
    }
}
