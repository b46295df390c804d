//! CoW relayer
//!
//! Off-chain matching for a custodial token-swap contract. Deposits observed
//! on chain fund a balance ledger; users post swap intents; a periodic
//! matcher looks for pairs that exactly satisfy each other and settles them
//! by authorizing custody withdrawals with the custodian key.
//!
//! # Example
//!
//! ```no_run
//! use cow_relayer::{
//!     chains::memory::InMemoryChain, ConfigBuilder, CustodianSigner, MatchingService, SigningScheme,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigBuilder::defaults()?;
//!     let chain = Arc::new(InMemoryChain::new());
//!     let signer = CustodianSigner::from_private_key("0x...", SigningScheme::EthSignedMessage)?;
//!
//!     let service = MatchingService::new(config, chain.clone(), chain, Arc::new(signer))?;
//!     service.initialize();
//!     // ...
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod audit;
pub mod authorization;
pub mod book;
pub mod chains;
pub mod config;
pub mod ingestor;
pub mod ledger;
pub mod matcher;
pub mod notifications;
pub mod scheduler;
pub mod service;
pub mod settlement;
pub mod types;

pub use authorization::{AuthorizationSigner, CustodianSigner, WithdrawalAuthorization};
pub use config::{load_config, ConfigBuilder};
pub use matcher::TickOutcome;
pub use service::MatchingService;
pub use types::{
    ClaimRequest, Intent, IntentRequest, MatchNotification, OperationResult, RelayerConfig, RelayerError,
    SigningScheme,
};
