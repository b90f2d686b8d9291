//! In-memory implementation of the key-value store.
//!
//! Used by the test suite and as the default when no database is
//! configured. Expiry is enforced lazily on read.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::KvStore;
use crate::error::GatewayError;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local [`KvStore`] backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        let map = self.entries.read().await;
        map.values().filter(|e| !e.is_expired()).count()
    }

    /// Returns `true` if the store holds no live records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, GatewayError> {
        {
            let map = self.entries.read().await;
            match map.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop the record so it does not linger.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), GatewayError> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn put_with_ttl(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), GatewayError> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, GatewayError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
