//! Authenticated encryption of serialized cursors.
//!
//! Wire form: URL-safe base64 (no padding) of `nonce || AES-256-GCM ciphertext`,
//! where the plaintext is the context's JSON encoding.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;

use super::context::PaginationContext;
use super::error::CursorError;

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct CursorCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CursorCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorCipher").finish_non_exhaustive()
    }
}

impl CursorCipher {
    /// Derive the key from an operator-supplied secret (SHA-256 of its bytes)
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(digest.as_slice())),
        }
    }

    /// Random per-process key. Cursors do not survive a restart.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Use the secret in environment variable `var`, or a random key when unset
    pub fn from_env(var: &str) -> Self {
        match std::env::var(var) {
            Ok(secret) if !secret.is_empty() => Self::from_secret(&secret),
            _ => {
                warn!(
                    "{} is not set; using a per-process cursor key, cursors will not survive restarts",
                    var
                );
                Self::generate()
            }
        }
    }

    pub fn seal(&self, context: &PaginationContext) -> Result<String, CursorError> {
        let plaintext =
            serde_json::to_vec(context).map_err(|e| CursorError::Encode(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CursorError::Encode("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decode and authenticate a cursor. Expiry is not checked here.
    pub fn open(&self, token: &str) -> Result<PaginationContext, CursorError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(token.trim().as_bytes())
            .map_err(|e| CursorError::Malformed(e.to_string()))?;
        if sealed.len() <= NONCE_LEN {
            return Err(CursorError::Malformed(format!(
                "{} bytes is too short",
                sealed.len()
            )));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CursorError::Decrypt)?;
        serde_json::from_slice(&plaintext).map_err(|e| CursorError::Malformed(e.to_string()))
    }
}
