//! Authenticated encryption capability.
//!
//! The service core only talks to [`AeadCipher`]; the AES-256-GCM binding
//! below is the one shipped with the binary.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use crate::errors::{AppError, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Ciphertext plus everything needed to open it, base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedData {
    pub algorithm: String,
    pub nonce: String,
    pub ciphertext: String,
}

pub trait AeadCipher: Send + Sync {
    /// Wire name of the primitive, e.g. "AES-256-GCM"
    fn algorithm(&self) -> &'static str;

    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedData>;

    /// Fails with `CryptoError` when the data or its associated data were altered
    fn decrypt(&self, sealed: &SealedData, aad: &[u8]) -> Result<Vec<u8>>;
}

pub struct Aes256GcmCipher {
    cipher: Aes256Gcm,
}

impl Aes256GcmCipher {
    /// Cipher with a freshly generated key that lives only in this process
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        Self { cipher: Aes256Gcm::new(&key) }
    }

    /// Cipher from a 64 character hex key
    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| AppError::configuration(format!("ENCRYPTION_KEY is not valid hex: {}", e)))?;
        if bytes.len() != KEY_LEN {
            return Err(AppError::configuration(format!(
                "ENCRYPTION_KEY must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|e| AppError::configuration(format!("Invalid encryption key: {}", e)))?;
        Ok(Self { cipher })
    }
}

impl AeadCipher for Aes256GcmCipher {
    fn algorithm(&self) -> &'static str {
        "AES-256-GCM"
    }

    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedData> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|_| AppError::crypto("encryption failed"))?;

        Ok(SealedData {
            algorithm: self.algorithm().to_string(),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    fn decrypt(&self, sealed: &SealedData, aad: &[u8]) -> Result<Vec<u8>> {
        if sealed.algorithm != self.algorithm() {
            return Err(AppError::crypto(format!("unsupported algorithm {}", sealed.algorithm)));
        }

        let nonce = BASE64
            .decode(&sealed.nonce)
            .map_err(|_| AppError::crypto("nonce is not valid base64"))?;
        if nonce.len() != NONCE_LEN {
            return Err(AppError::crypto("nonce has the wrong length"));
        }
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .map_err(|_| AppError::crypto("ciphertext is not valid base64"))?;

        self.cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: &ciphertext, aad })
            .map_err(|_| AppError::crypto("authentication tag mismatch"))
    }
}
