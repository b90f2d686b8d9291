//! Persistence layer: TTL-capable key-value storage.
//!
//! Sessions, API-key bindings, quota ledgers and connection records are
//! persisted through the [`KvStore`] trait — plain get/put/delete with
//! optional TTL, no transactions. The gateway deliberately performs
//! unsynchronized read-then-write sequences against these records; two
//! concurrent updates for the same key can lose one. This is a documented
//! limitation, not something the store is expected to prevent.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::SessionId;
use crate::error::GatewayError;

pub use memory::MemoryKvStore;
pub use postgres::PostgresKvStore;

/// Opaque TTL-capable key-value collaborator.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads the value stored under `key`, if present and unexpired.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on store failure.
    async fn get(&self, key: &str) -> Result<Option<Value>, GatewayError>;

    /// Writes `value` under `key` with no expiry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on store failure.
    async fn put(&self, key: &str, value: Value) -> Result<(), GatewayError>;

    /// Writes `value` under `key`, expiring after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on store failure.
    async fn put_with_ttl(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), GatewayError>;

    /// Deletes the record under `key`, returning `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on store failure.
    async fn delete(&self, key: &str) -> Result<bool, GatewayError>;
}

/// Key of the persisted session record.
#[must_use]
pub fn session_key(id: SessionId) -> String {
    format!("session:{id}")
}

/// Key of the API-key → session-id binding record.
#[must_use]
pub fn api_key_key(api_key: &str) -> String {
    format!("apikey:{api_key}")
}

/// Key of the per-user quota ledger record.
#[must_use]
pub fn quota_key(user_id: &str) -> String {
    format!("quota:{user_id}")
}

/// Key of the bounded-TTL live-connection record.
#[must_use]
pub fn connection_key(session_id: SessionId) -> String {
    format!("connection:{session_id}")
}
