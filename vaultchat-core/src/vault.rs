//! Session vault: encrypted transcript persistence partitioned by client.
//!
//! Keys have the form `hist_<client>_<millis>`. Listing a client uses the
//! prefix `hist_<client>_`, so the trailing separator keeps `1.2.3.4` from
//! matching `1.2.3.45`. Two writes by one client in the same millisecond
//! share a key and the later one wins.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::future::try_join_all;

use crate::config::VaultConfig;
use crate::crypto::EnvelopeCipher;
use crate::error::VaultError;
use crate::models::{ChatMessage, ClientId, SessionRecord};
use crate::store::KvStore;

pub const SESSION_KEY_PREFIX: &str = "hist_";

/// Seven days.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(604_800);

pub fn client_prefix(client: &ClientId) -> String {
    format!("{}{}_", SESSION_KEY_PREFIX, client)
}

pub fn session_key(client: &ClientId, created_at_millis: i64) -> String {
    format!("{}{}", client_prefix(client), created_at_millis)
}

#[derive(Clone)]
pub struct SessionVault {
    backend: Arc<dyn KvStore>,
    cipher: EnvelopeCipher,
    ttl: Duration,
}

impl SessionVault {
    pub fn new(backend: Arc<dyn KvStore>, cipher: EnvelopeCipher, ttl: Duration) -> Self {
        Self {
            backend,
            cipher,
            ttl,
        }
    }

    pub fn from_config(backend: Arc<dyn KvStore>, config: &VaultConfig) -> Result<Self, VaultError> {
        let cipher = EnvelopeCipher::derive(&config.encryption_secret)?;
        Ok(Self::new(backend, cipher, Duration::from_secs(config.ttl_seconds)))
    }

    pub fn backend(&self) -> &Arc<dyn KvStore> {
        &self.backend
    }

    /// Encrypt `messages` and write them under a fresh session id.
    pub async fn store(
        &self,
        client: &ClientId,
        messages: &[ChatMessage],
    ) -> Result<String, VaultError> {
        self.store_at(client, messages, Utc::now().timestamp_millis())
            .await
    }

    /// As [`SessionVault::store`] with an explicit creation timestamp.
    pub async fn store_at(
        &self,
        client: &ClientId,
        messages: &[ChatMessage],
        created_at_millis: i64,
    ) -> Result<String, VaultError> {
        let session_id = session_key(client, created_at_millis);
        let envelope = self.cipher.encrypt(messages)?;

        self.backend
            .put(&session_id, Bytes::from(envelope), self.ttl)
            .await?;

        tracing::debug!(
            session_id = %session_id,
            count = messages.len(),
            backend = self.backend.name(),
            "Stored encrypted session"
        );
        Ok(session_id)
    }

    /// Every session stored for `client`, in store listing order. Entries
    /// that fail to decrypt are returned with `data: None`; store errors
    /// abort the whole listing.
    pub async fn list_decrypted(&self, client: &ClientId) -> Result<Vec<SessionRecord>, VaultError> {
        let keys = self.backend.list(&client_prefix(client)).await?;

        let fetches = keys.into_iter().map(|id| async move {
            let data = match self.backend.get(&id).await? {
                Some(raw) => self.open(&id, &raw),
                None => {
                    tracing::debug!(session_id = %id, "Session vanished between list and get");
                    None
                }
            };
            Ok::<_, VaultError>(SessionRecord { id, data })
        });

        try_join_all(fetches).await
    }

    fn open(&self, session_id: &str, raw: &[u8]) -> Option<Vec<ChatMessage>> {
        match self.cipher.try_decrypt(raw) {
            Ok(messages) => Some(messages),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Decryption failed");
                None
            }
        }
    }
}
