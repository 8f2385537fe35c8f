//! Key-value store capability used by the session vault.
//!
//! Expiry is the store's job: entries written with a TTL become invisible to
//! `get` and `list` once it elapses.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::VaultError;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), VaultError>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, VaultError>;

    /// Keys starting with `prefix` (literal match). Ordering is backend-defined.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, VaultError>;

    /// Connectivity probe; returns a short backend description.
    async fn ping(&self) -> Result<String, VaultError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

struct StoredEntry {
    value: Bytes,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local store. Lists keys in lexicographic order.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), VaultError> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| VaultError::Store(format!("ttl of {}s is out of range", ttl.as_secs())))?;

        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));
        entries.insert(key.to_string(), StoredEntry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, VaultError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, VaultError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn ping(&self) -> Result<String, VaultError> {
        Ok(format!("memory ({} live entries)", self.len().await))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
