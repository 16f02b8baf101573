use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::crypto::{CryptoError, CryptoProvider, OsCryptoProvider};

/// Number of hex characters in the canonical key form.
pub const KEY_HEX_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid key format")]
    InvalidKey,
    #[error("Key generation failed: {0}")]
    GenerationFailed(#[from] CryptoError),
}

/// 256-bit room key. Displays as 64 lowercase hex characters; `Debug` only
/// shows a fingerprint.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomKey {
    bytes: [u8; 32],
}

impl RoomKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// First 8 hex characters of SHA-256 over the key. Safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes);
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RoomKey").field(&self.fingerprint()).finish()
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for RoomKey {
    type Err = KeyError;

    fn from_str(candidate: &str) -> Result<Self, Self::Err> {
        if candidate.len() != KEY_HEX_LEN || !candidate.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(KeyError::InvalidKey);
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(candidate, &mut bytes).map_err(|_| KeyError::InvalidKey)?;
        Ok(Self { bytes })
    }
}

/// Creates and validates room keys.
#[derive(Clone)]
pub struct KeyManager {
    provider: Arc<dyn CryptoProvider>,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new(Arc::new(OsCryptoProvider))
    }
}

impl KeyManager {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self { provider }
    }

    /// Draws 32 bytes from the secure source. There is no fallback if the
    /// source fails.
    pub fn generate(&self) -> Result<RoomKey, KeyError> {
        let mut bytes = [0u8; 32];
        self.provider.fill_random(&mut bytes)?;
        Ok(RoomKey { bytes })
    }

    pub fn validate(candidate: &str) -> Result<RoomKey, KeyError> {
        candidate.parse()
    }
}
