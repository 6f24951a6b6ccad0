use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::sync::Arc;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("cipher key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("ciphertext is not valid base64url")]
    Encoding(#[from] base64::DecodeError),

    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),

    #[error("ciphertext failed authentication")]
    Authentication,

    #[error("decrypted payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// AES-256-GCM encryption for secrets at rest.
///
/// Output layout is `base64url(nonce || ciphertext || tag)` with a fresh
/// random nonce per call.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Arc<Aes256Gcm>,
}

impl SecretCipher {
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
        Ok(Self {
            cipher: Arc::new(cipher),
        })
    }

    /// Build from the base64 (standard alphabet) key held in configuration.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CipherError> {
        use base64::engine::general_purpose::STANDARD;
        let key = STANDARD.decode(encoded.trim())?;
        Self::new(&key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Authentication)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(payload))
    }

    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let payload = URL_SAFE_NO_PAD.decode(token)?;
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::TooShort(payload.len()));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Authentication)?;

        Ok(String::from_utf8(plaintext)?)
    }
}
