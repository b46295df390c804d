use crate::{
    authorization::SignedWithdrawal,
    types::{RawDepositLog, RelayerError, TransactionHash},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod abi;
pub mod evm;
pub mod memory;

/// Read side of the custody contract: deposit logs and block context
#[async_trait]
pub trait DepositSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64, RelayerError>;
    /// `Deposited` logs in the inclusive block range.
    async fn deposit_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawDepositLog>, RelayerError>;
    async fn block_timestamp(&self, block: u64) -> Result<DateTime<Utc>, RelayerError>;
}

/// Write side of the custody contract.
///
/// Sending is split in two so callers know whether a transaction may be on
/// chain: an `Err` from [`broadcast_withdrawal`](Self::broadcast_withdrawal)
/// means the node never accepted it, while anything after a returned hash is
/// out of the relayer's hands.
#[async_trait]
pub trait CustodyContract: Send + Sync {
    /// Dry-run the withdrawal; `Err` means it would revert.
    async fn simulate_withdrawal(&self, withdrawal: &SignedWithdrawal) -> Result<(), RelayerError>;
    /// Hand the withdrawal to the node and return its transaction hash.
    async fn broadcast_withdrawal(&self, withdrawal: &SignedWithdrawal) -> Result<TransactionHash, RelayerError>;
    /// Wait for the receipt: `true` if it succeeded, `false` if it reverted.
    /// `Err` leaves the outcome unknown.
    async fn confirm_withdrawal(&self, tx_hash: TransactionHash) -> Result<bool, RelayerError>;
}
