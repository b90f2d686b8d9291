//! PostgreSQL implementation of the key-value store.
//!
//! Records live in a single `kv_records` table keyed by text, with a
//! JSONB value and an optional expiry column. Expired rows are filtered
//! on read; no background vacuum is required for correctness.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;

use super::KvStore;
use crate::error::GatewayError;

/// PostgreSQL-backed [`KvStore`] using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresKvStore {
    pool: PgPool,
}

impl PostgresKvStore {
    /// Creates a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the backing table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError::PersistenceError`] on database failure.
    pub async fn ensure_schema(&self) -> Result<(), GatewayError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_records (\
                 key TEXT PRIMARY KEY,\
                 value JSONB NOT NULL,\
                 expires_at TIMESTAMPTZ\
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn upsert(
        &self,
        key: &str,
        value: Value,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO kv_records (key, value, expires_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = $2, expires_at = $3",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for PostgresKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, GatewayError> {
        let row = sqlx::query_scalar::<_, Value>(
            "SELECT value FROM kv_records \
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(row)
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), GatewayError> {
        self.upsert(key, value, None).await
    }

    async fn put_with_ttl(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), GatewayError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        self.upsert(key, value, Some(expires_at)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, GatewayError> {
        let result = sqlx::query("DELETE FROM kv_records WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}
