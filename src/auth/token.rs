//! Opaque identifier generation.
//!
//! Tokens are lowercase hex over bytes drawn straight from the operating
//! system CSPRNG. Nothing is cached between calls, so one output says nothing
//! about the next.

use rand::rngs::OsRng;
use rand::RngCore;
use crate::errors::{AppError, Result};

/// Byte length used for session identifiers (256 bits)
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Byte length used for generated salts
pub const SALT_BYTES: usize = 16;

#[derive(Debug, Default, Clone, Copy)]
pub struct TokenGenerator;

impl TokenGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Hex string of `byte_length` random bytes
    pub fn generate(&self, byte_length: usize) -> Result<String> {
        Ok(hex::encode(random_bytes(byte_length)?))
    }
}

/// Fill a fresh buffer from the OS CSPRNG.
///
/// A failing entropy source is reported, never papered over with a weaker RNG.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AppError::storage(format!("secure random source unavailable: {}", e)))?;
    Ok(bytes)
}
