use super::{
    abi::{Deposited, ICustody},
    CustodyContract, DepositSource,
};
use crate::{
    authorization::SignedWithdrawal,
    types::{parse_address, ChainConfig, LogPosition, RawDepositLog, RelayerError, TransactionHash},
};
use alloy_network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy_primitives::Address;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{BlockNumberOrTag, Filter, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Custody contract on an EVM chain over JSON-RPC
pub struct EvmCustodyChain {
    provider: DynProvider,
    contract: Address,
    sender: Address,
}

impl EvmCustodyChain {
    /// Build the HTTP provider. No request is made until first use.
    pub fn connect(config: &ChainConfig) -> Result<Self, RelayerError> {
        let url: reqwest::Url = config
            .rpc_url
            .parse()
            .map_err(|e| RelayerError::ConfigError(format!("Invalid RPC URL: {}", e)))?;

        let contract = parse_address("contract_address", &config.contract_address)
            .map_err(|e| RelayerError::ConfigError(e.to_string()))?;

        let signer: PrivateKeySigner = config
            .private_key
            .trim()
            .parse()
            .map_err(|e| RelayerError::ConfigError(format!("Invalid private key: {}", e)))?;
        let sender = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        info!("Custody contract {} via {} (sender {})", contract, config.rpc_url, sender);

        Ok(Self {
            provider,
            contract,
            sender,
        })
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    fn withdrawal_request(&self, withdrawal: &SignedWithdrawal) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.sender)
            .with_to(self.contract)
            .with_input(encode_withdrawal(withdrawal))
    }
}

pub fn encode_withdrawal(withdrawal: &SignedWithdrawal) -> Vec<u8> {
    ICustody::withdrawTokensWithSignatureCall {
        user: withdrawal.authorization.owner,
        token: withdrawal.authorization.token,
        amount: withdrawal.authorization.amount,
        signature: withdrawal.signature.clone(),
    }
    .abi_encode()
}

fn submission_error(withdrawal: &SignedWithdrawal, reason: String) -> RelayerError {
    RelayerError::ChainSubmission {
        owner: withdrawal.authorization.owner,
        token: withdrawal.authorization.token,
        amount: withdrawal.authorization.amount,
        reason,
    }
}

#[async_trait]
impl DepositSource for EvmCustodyChain {
    async fn latest_block(&self) -> Result<u64, RelayerError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| RelayerError::Chain(format!("Failed to get block number: {}", e)))
    }

    async fn deposit_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawDepositLog>, RelayerError> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(Deposited::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| RelayerError::Chain(format!("Failed to get deposit logs: {}", e)))?;

        debug!("Fetched {} deposit logs for blocks {}..={}", logs.len(), from_block, to_block);

        Ok(logs
            .into_iter()
            .filter(|log| !log.removed)
            .filter_map(|log| {
                let position = LogPosition {
                    block: log.block_number?,
                    log_index: log.log_index?,
                };
                Some(RawDepositLog {
                    position,
                    transaction_hash: log.transaction_hash.map(TransactionHash),
                    topics: log.topics().to_vec(),
                    data: log.data().data.to_vec(),
                })
            })
            .collect())
    }

    async fn block_timestamp(&self, number: u64) -> Result<DateTime<Utc>, RelayerError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .map_err(|e| RelayerError::Chain(format!("Failed to get block {}: {}", number, e)))?
            .ok_or_else(|| RelayerError::Chain(format!("Block {} not found", number)))?;

        DateTime::from_timestamp(block.header.timestamp as i64, 0)
            .ok_or_else(|| RelayerError::Chain(format!("Block {} has invalid timestamp", number)))
    }
}

#[async_trait]
impl CustodyContract for EvmCustodyChain {
    async fn simulate_withdrawal(&self, withdrawal: &SignedWithdrawal) -> Result<(), RelayerError> {
        self.provider
            .call(self.withdrawal_request(withdrawal))
            .await
            .map_err(|e| submission_error(withdrawal, format!("Simulation reverted: {}", e)))?;
        Ok(())
    }

    async fn broadcast_withdrawal(&self, withdrawal: &SignedWithdrawal) -> Result<TransactionHash, RelayerError> {
        let pending = self
            .provider
            .send_transaction(self.withdrawal_request(withdrawal))
            .await
            .map_err(|e| submission_error(withdrawal, format!("Failed to send transaction: {}", e)))?;

        let tx_hash = TransactionHash(*pending.tx_hash());
        debug!("Broadcast withdrawal for {} as {}", withdrawal.authorization.owner, tx_hash);
        Ok(tx_hash)
    }

    /// Polls until the receipt shows up. The caller bounds the wait.
    async fn confirm_withdrawal(&self, tx_hash: TransactionHash) -> Result<bool, RelayerError> {
        loop {
            match self.provider.get_transaction_receipt(tx_hash.0).await {
                Ok(Some(receipt)) => return Ok(receipt.status()),
                Ok(None) => {}
                Err(e) => warn!("Receipt lookup for {} failed: {}", tx_hash, e),
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
