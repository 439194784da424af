//! Encrypted sync keys.
//!
//! A sync key carries a small map of named parameters through an untrusted
//! redirect round-trip. Nothing is stored server-side: the key itself is an
//! AES-256-GCM encrypted blob, so any instance holding the same secret can
//! read it back, and any alteration is detected by the GCM tag.
//!
//! Format:  base64url( nonce || ciphertext || tag )
//!
//! The plaintext is the JSON object of the parameter map, e.g.
//! `{"identifier":"3f1c…","service":"facebook"}`.

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

pub type SyncParams = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyncKeyError {
    #[error("sync key is not valid base64url")]
    Encoding,
    #[error("sync key too short")]
    TooShort,
    #[error("sync key is invalid or tampered")]
    Tampered,
    #[error("sync key payload corrupt")]
    Corrupt,
    #[error("failed to seal sync key: {0}")]
    Seal(String),
}

/// Symmetric codec for sync keys. Cheap to clone.
#[derive(Clone)]
pub struct SyncKeyCodec {
    key: [u8; 32],
}

impl SyncKeyCodec {
    /// Derive the AES key from the configured secret. The secret is hashed so
    /// any length of input yields a clean 256-bit key.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Sha256::digest(secret).into(),
        }
    }

    fn cipher(&self) -> Result<Aes256Gcm, SyncKeyError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| SyncKeyError::Seal(e.to_string()))
    }

    /// Encrypt `params` into a URL-safe sync key.
    pub fn encode(&self, params: &SyncParams) -> Result<String, SyncKeyError> {
        let plaintext =
            serde_json::to_vec(params).map_err(|e| SyncKeyError::Seal(e.to_string()))?;

        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| SyncKeyError::Seal(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(&blob))
    }

    /// Decrypt a sync key. Fails for anything not sealed by [`encode`] under
    /// the same secret.
    ///
    /// [`encode`]: SyncKeyCodec::encode
    pub fn decode(&self, key: &str) -> Result<SyncParams, SyncKeyError> {
        let blob = URL_SAFE_NO_PAD
            .decode(key)
            .map_err(|_| SyncKeyError::Encoding)?;

        // nonce + 16-byte tag at minimum
        if blob.len() < NONCE_LEN + 16 {
            return Err(SyncKeyError::TooShort);
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher()?
            .decrypt(nonce, ciphertext)
            .map_err(|_| SyncKeyError::Tampered)?;

        serde_json::from_slice(&plaintext).map_err(|_| SyncKeyError::Corrupt)
    }
}
