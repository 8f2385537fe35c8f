//! Envelope encryption for stored transcripts.
//!
//! The configured secret's UTF-8 bytes are used directly as an AES-GCM key:
//! 16 bytes selects AES-128, 32 bytes AES-256. Every call to [`EnvelopeCipher::encrypt`]
//! draws a fresh 12-byte IV from the OS RNG. The stored value is the JSON
//! [`Envelope`] `{iv, data}` where `data` carries the GCM tag at its end.

use std::fmt;

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};

use crate::error::VaultError;
use crate::models::{ChatMessage, Envelope};

pub const IV_LEN: usize = 12;

#[derive(Clone)]
enum CipherKind {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

/// AES-GCM key handle. Usable for both directions; the key bytes are not
/// retrievable from it.
#[derive(Clone)]
pub struct EnvelopeCipher {
    inner: CipherKind,
}

impl fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvelopeCipher(AES-{}-GCM)", self.key_bits())
    }
}

impl EnvelopeCipher {
    /// Import `secret` as a raw AES-GCM key. Deterministic: the same secret
    /// always opens envelopes sealed by any other handle derived from it.
    pub fn derive(secret: &str) -> Result<Self, VaultError> {
        let raw = secret.as_bytes();
        let inner = match raw.len() {
            16 => CipherKind::Aes128(
                Aes128Gcm::new_from_slice(raw).map_err(|_| VaultError::InvalidKeyLength(16))?,
            ),
            32 => CipherKind::Aes256(
                Aes256Gcm::new_from_slice(raw).map_err(|_| VaultError::InvalidKeyLength(32))?,
            ),
            n => return Err(VaultError::InvalidKeyLength(n)),
        };
        Ok(Self { inner })
    }

    pub fn key_bits(&self) -> usize {
        match self.inner {
            CipherKind::Aes128(_) => 128,
            CipherKind::Aes256(_) => 256,
        }
    }

    /// Seal `messages` into serialized envelope bytes.
    pub fn encrypt(&self, messages: &[ChatMessage]) -> Result<Vec<u8>, VaultError> {
        let plaintext = serde_json::to_vec(messages)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let data = match &self.inner {
            CipherKind::Aes128(c) => c.encrypt(&nonce, plaintext.as_slice()),
            CipherKind::Aes256(c) => c.encrypt(&nonce, plaintext.as_slice()),
        }
        .map_err(|e| VaultError::Cipher(e.to_string()))?;

        let envelope = Envelope {
            iv: nonce.to_vec(),
            data,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Open serialized envelope bytes, reporting why it failed.
    pub fn try_decrypt(&self, bytes: &[u8]) -> Result<Vec<ChatMessage>, VaultError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.iv.len() != IV_LEN {
            return Err(VaultError::InvalidEnvelope(format!(
                "iv must be {} bytes, got {}",
                IV_LEN,
                envelope.iv.len()
            )));
        }

        let nonce = Nonce::<U12>::from_slice(&envelope.iv);
        let plaintext = match &self.inner {
            CipherKind::Aes128(c) => c.decrypt(nonce, envelope.data.as_slice()),
            CipherKind::Aes256(c) => c.decrypt(nonce, envelope.data.as_slice()),
        }
        .map_err(|_| VaultError::Cipher("authentication tag mismatch".to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Open serialized envelope bytes; any failure yields `None`.
    pub fn decrypt(&self, bytes: &[u8]) -> Option<Vec<ChatMessage>> {
        self.try_decrypt(bytes).ok()
    }
}
