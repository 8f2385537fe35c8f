use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::StoreConfig;
use crate::error::VaultError;
use crate::store::KvStore;

pub async fn create_pool(config: &StoreConfig) -> Result<PgPool, VaultError> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| VaultError::Store("store.url is required for the postgres backend".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// PostgreSQL-backed [`KvStore`]. Expired rows are filtered on read and
/// removed by [`PgStore::purge_expired`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the backing table exists.
    pub async fn connect(config: &StoreConfig) -> Result<Self, VaultError> {
        let store = Self::new(create_pool(config).await?);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), VaultError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vault_entries (
                key        TEXT PRIMARY KEY,
                value      BYTEA NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS vault_entries_expires_at_idx ON vault_entries (expires_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete rows whose TTL has elapsed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, VaultError> {
        let result = sqlx::query("DELETE FROM vault_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl KvStore for PgStore {
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), VaultError> {
        sqlx::query(
            r#"
            INSERT INTO vault_entries (key, value, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value,
                    expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value.as_ref())
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, VaultError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT value FROM vault_entries WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value,)| Bytes::from(value)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, VaultError> {
        // starts_with() rather than LIKE: session keys contain '_'.
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT key FROM vault_entries
            WHERE starts_with(key, $1) AND expires_at > NOW()
            ORDER BY key
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn ping(&self) -> Result<String, VaultError> {
        Ok(health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
