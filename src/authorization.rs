//! Withdrawal authorizations for the custody contract.
//!
//! The contract releases `amount` of `token` for `owner` only against a
//! signature by the custodian key over `keccak256(owner ‖ token ‖ amount)`,
//! packed as 20 + 20 + 32 bytes.

use crate::types::SigningScheme;
use alloy_primitives::{eip191_hash_message, keccak256, Address, Bytes, B256, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalAuthorization {
    pub owner: Address,
    pub token: Address,
    pub amount: U256,
}

impl WithdrawalAuthorization {
    pub fn new(owner: Address, token: Address, amount: U256) -> Self {
        Self { owner, token, amount }
    }

    /// `abi.encodePacked(address, address, uint256)`
    pub fn encode_packed(&self) -> Vec<u8> {
        let mut packed = Vec::with_capacity(72);
        packed.extend_from_slice(self.owner.as_slice());
        packed.extend_from_slice(self.token.as_slice());
        packed.extend_from_slice(&self.amount.to_be_bytes::<32>());
        packed
    }

    pub fn message_hash(&self) -> B256 {
        keccak256(self.encode_packed())
    }
}

/// Authorization plus the custodian's 65-byte signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedWithdrawal {
    pub authorization: WithdrawalAuthorization,
    pub signature: Bytes,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SigningError(pub String);

/// Signs withdrawal message hashes on behalf of the custodian.
#[async_trait]
pub trait AuthorizationSigner: Send + Sync {
    fn custodian(&self) -> Address;
    async fn sign(&self, message_hash: B256) -> Result<Bytes, SigningError>;
}

/// Local secp256k1 custodian key
pub struct CustodianSigner {
    signer: PrivateKeySigner,
    scheme: SigningScheme,
}

impl CustodianSigner {
    pub fn new(signer: PrivateKeySigner, scheme: SigningScheme) -> Self {
        Self { signer, scheme }
    }

    /// Hex key, with or without `0x`.
    pub fn from_private_key(key: &str, scheme: SigningScheme) -> Result<Self, SigningError> {
        let signer = key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| SigningError(format!("Invalid custodian private key: {}", e)))?;
        Ok(Self::new(signer, scheme))
    }

    pub fn scheme(&self) -> SigningScheme {
        self.scheme
    }

    /// Bytes handed to EIP-191 `personal_sign` for a given message hash.
    pub fn signing_payload(scheme: SigningScheme, message_hash: B256) -> B256 {
        match scheme {
            SigningScheme::EthSignedMessage => message_hash,
            SigningScheme::DoubleEthSignedMessage => eip191_hash_message(message_hash),
        }
    }
}

#[async_trait]
impl AuthorizationSigner for CustodianSigner {
    fn custodian(&self) -> Address {
        self.signer.address()
    }

    async fn sign(&self, message_hash: B256) -> Result<Bytes, SigningError> {
        let payload = Self::signing_payload(self.scheme, message_hash);
        let signature = self
            .signer
            .sign_message(payload.as_slice())
            .await
            .map_err(|e| SigningError(e.to_string()))?;
        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }
}
