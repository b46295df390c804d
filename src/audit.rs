//! Sealed audit records.
//!
//! Intent submissions are logged encrypted so that only the enclave holding
//! the audit key can read them back. The key is `sha256` of the enclave
//! address string; each record carries its own random 96-bit nonce.

use crate::types::{Intent, RelayerError};
use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// Base64 ciphertext, nonce and GCM tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedRecord {
    pub iv: String,
    pub encrypted_data: String,
    pub auth_tag: String,
}

/// Plaintext of an intent submission record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAuditRecord {
    pub user: String,
    pub from_token: String,
    pub to_token: String,
    pub amount: String,
    pub receive: String,
    pub expiry_time: String,
}

impl From<&Intent> for IntentAuditRecord {
    fn from(intent: &Intent) -> Self {
        Self {
            user: intent.owner.to_string(),
            from_token: intent.token_offered.to_string(),
            to_token: intent.token_wanted.to_string(),
            amount: intent.amount_offered.to_string(),
            receive: intent.amount_wanted.to_string(),
            expiry_time: intent.expires_at.to_rfc3339(),
        }
    }
}

pub struct IntentAuditSealer {
    cipher: Aes256Gcm,
}

impl IntentAuditSealer {
    pub fn new(enclave_address: &str) -> Result<Self, RelayerError> {
        let key = Sha256::digest(enclave_address.trim().as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| RelayerError::Audit(format!("Invalid key: {}", e)))?;
        Ok(Self { cipher })
    }

    pub fn seal<T: Serialize>(&self, record: &T) -> Result<SealedRecord, RelayerError> {
        let plaintext = serde_json::to_vec(record)?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);

        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|e| RelayerError::Audit(format!("AES-GCM encrypt failed: {}", e)))?;
        let tag = sealed.split_off(sealed.len() - TAG_LENGTH);

        Ok(SealedRecord {
            iv: STANDARD.encode(nonce_bytes),
            encrypted_data: STANDARD.encode(sealed),
            auth_tag: STANDARD.encode(tag),
        })
    }

    pub fn open<T: DeserializeOwned>(&self, sealed: &SealedRecord) -> Result<T, RelayerError> {
        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| RelayerError::Audit(format!("Invalid {}: {}", field, e)))
        };
        let nonce = decode("iv", &sealed.iv)?;
        if nonce.len() != NONCE_LENGTH {
            return Err(RelayerError::Audit(format!("iv must be {} bytes", NONCE_LENGTH)));
        }

        let mut ciphertext = decode("encryptedData", &sealed.encrypted_data)?;
        ciphertext.extend_from_slice(&decode("authTag", &sealed.auth_tag)?);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| RelayerError::Audit("Decryption failed - wrong key or tampered record".to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}
