//! Authentication and session service.
//!
//! Turns an API key into a cached, quota-bearing [`Session`] backed by
//! the key-value store. Sessions are cached in-process by both session
//! id and API key for a fixed validity window; a cache hit skips the
//! store entirely. All read-path persistence failures fail closed (the
//! caller is simply not authenticated); write-path failures propagate
//! because they are a real consistency risk.
//!
//! Quota updates are non-atomic get-then-put sequences. Two concurrent
//! updates for the same user can lose one; this is an accepted,
//! documented limitation of the shared-store model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::config::GatewayConfig;
use crate::domain::session::next_daily_boundary;
use crate::domain::{Permissions, QuotaLedger, Session, SessionId};
use crate::error::GatewayError;
use crate::persistence::{KvStore, api_key_key, quota_key, session_key};

#[derive(Debug, Clone)]
struct CachedSession {
    session: Session,
    cached_at: Instant,
}

/// Authentication, session cache and quota ledger service.
pub struct AuthService {
    store: Arc<dyn KvStore>,
    api_key_min_length: usize,
    cache_ttl: Duration,
    base_quota_limit: u64,
    quota_warn_threshold_pct: f64,
    by_key: RwLock<HashMap<String, CachedSession>>,
    by_id: RwLock<HashMap<SessionId, CachedSession>>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("api_key_min_length", &self.api_key_min_length)
            .field("cache_ttl", &self.cache_ttl)
            .field("base_quota_limit", &self.base_quota_limit)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    /// Creates a new service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, config: &GatewayConfig) -> Self {
        Self {
            store,
            api_key_min_length: config.api_key_min_length,
            cache_ttl: config.session_cache_ttl,
            base_quota_limit: config.base_quota_limit,
            quota_warn_threshold_pct: config.quota_warn_threshold_pct,
            by_key: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
        }
    }

    /// Structural API key check: minimum length, printable ASCII only.
    #[must_use]
    pub fn is_well_formed_key(&self, key: &str) -> bool {
        key.len() >= self.api_key_min_length && key.chars().all(|c| c.is_ascii_graphic())
    }

    /// Resolves an API key to its session.
    ///
    /// Returns `None` for a malformed key, an unknown key, or any
    /// persistence failure on the way (fail closed). On success the
    /// session's `last_activity` is refreshed and both caches updated;
    /// a cache hit inside the validity window never touches the store.
    pub async fn validate_api_key(&self, key: &str) -> Option<Session> {
        if !self.is_well_formed_key(key) {
            tracing::debug!("rejected malformed api key");
            return None;
        }

        if let Some(cached) = self.cache_get_by_key(key).await {
            let mut session = cached;
            session.touch();
            self.cache_touch(&session).await;
            return Some(session);
        }

        match self.load_session_by_key(key).await {
            Ok(Some(mut session)) => {
                session.touch();
                // Get-then-put refresh of last_activity; a lost update here
                // is the documented shared-store limitation.
                if let Err(err) = self.persist_session(&session).await {
                    tracing::warn!(error = %err, "failed to persist session activity refresh");
                }
                self.cache_insert(&session).await;
                Some(session)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "session lookup failed, treating as unauthenticated");
                None
            }
        }
    }

    /// Returns the cached session for an id, if inside the validity window.
    pub async fn session_by_id(&self, id: SessionId) -> Option<Session> {
        let map = self.by_id.read().await;
        map.get(&id)
            .filter(|c| c.cached_at.elapsed() < self.cache_ttl)
            .map(|c| c.session.clone())
    }

    /// Mints a new session for an API key.
    ///
    /// Writes three independent records — session, apikey→session and
    /// quota ledger — with no cross-record transaction, then seeds both
    /// caches. The quota limit is `base × permissions.quota_multiplier`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for a malformed key and
    /// propagates any persistence failure.
    pub async fn create_session(
        &self,
        api_key: &str,
        user_id: &str,
        permissions: Permissions,
    ) -> Result<Session, GatewayError> {
        if !self.is_well_formed_key(api_key) {
            return Err(GatewayError::InvalidRequest(format!(
                "api key must be at least {} printable ASCII characters",
                self.api_key_min_length
            )));
        }

        let limit = (self.base_quota_limit as f64 * permissions.quota_multiplier.max(0.0)) as u64;
        let session = Session::new(
            user_id.to_string(),
            api_key.to_string(),
            limit,
            permissions,
        );

        self.persist_session(&session).await?;
        self.store
            .put(
                &api_key_key(api_key),
                serde_json::json!({ "sessionId": session.id }),
            )
            .await?;
        let ledger = QuotaLedger::new(limit);
        self.store
            .put(
                &quota_key(user_id),
                serde_json::to_value(&ledger)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?,
            )
            .await?;

        self.cache_insert(&session).await;
        tracing::info!(session_id = %session.id, user_id, quota_limit = limit, "session created");
        Ok(session)
    }

    /// Reads the quota ledger for a user, rolling it over if the daily
    /// boundary has passed.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures; returns `Ok(None)` for an
    /// unknown user.
    pub async fn get_quota(&self, user_id: &str) -> Result<Option<QuotaLedger>, GatewayError> {
        let raw = self.store.get(&quota_key(user_id)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut ledger: QuotaLedger = serde_json::from_value(raw)
            .map_err(|e| GatewayError::PersistenceError(format!("corrupt quota record: {e}")))?;
        let now = Utc::now();
        if now >= ledger.reset_at {
            ledger.used = 0;
            ledger.reset_at = next_daily_boundary(now);
            ledger.last_updated = now;
        }
        Ok(Some(ledger))
    }

    /// Adds `delta` units to a user's quota usage (write-through).
    ///
    /// Logs a warning when usage crosses the configured threshold. The
    /// read-modify-write is unsynchronized by design.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for an unknown user and
    /// propagates persistence failures.
    pub async fn update_quota(
        &self,
        user_id: &str,
        delta: u64,
    ) -> Result<QuotaLedger, GatewayError> {
        let mut ledger = self
            .get_quota(user_id)
            .await?
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown user: {user_id}")))?;

        let pct_before = ledger.percent_used();
        ledger.used = ledger.used.saturating_add(delta);
        ledger.last_updated = Utc::now();
        let pct_after = ledger.percent_used();

        if pct_before < self.quota_warn_threshold_pct && pct_after >= self.quota_warn_threshold_pct
        {
            tracing::warn!(
                user_id,
                used = ledger.used,
                limit = ledger.limit,
                pct = pct_after,
                "quota usage crossed warning threshold"
            );
        }

        self.store
            .put(
                &quota_key(user_id),
                serde_json::to_value(&ledger)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?,
            )
            .await?;
        Ok(ledger)
    }

    /// Pure availability check: `true` iff `used + cost <= limit`.
    ///
    /// Unknown users and read failures count as unavailable.
    pub async fn has_quota_available(&self, user_id: &str, cost: u64) -> bool {
        match self.get_quota(user_id).await {
            Ok(Some(ledger)) => ledger.has_available(cost),
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(user_id, error = %err, "quota read failed, treating as unavailable");
                false
            }
        }
    }

    /// Verifies that `cost` more units fit under the user's limit,
    /// without mutating the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::QuotaExceeded`] when they do not,
    /// [`GatewayError::Internal`] for a session without a ledger, and
    /// propagates read failures.
    pub async fn ensure_quota(&self, user_id: &str, cost: u64) -> Result<(), GatewayError> {
        match self.get_quota(user_id).await? {
            Some(ledger) if ledger.has_available(cost) => Ok(()),
            Some(ledger) => Err(GatewayError::QuotaExceeded {
                used: ledger.used,
                limit: ledger.limit,
            }),
            None => Err(GatewayError::Internal(format!(
                "quota ledger missing for user {user_id}"
            ))),
        }
    }

    /// Zeroes a user's usage and advances the reset boundary.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for an unknown user and
    /// propagates persistence failures.
    pub async fn reset_quota(&self, user_id: &str) -> Result<QuotaLedger, GatewayError> {
        let mut ledger = self
            .get_quota(user_id)
            .await?
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown user: {user_id}")))?;
        let now = Utc::now();
        ledger.used = 0;
        ledger.reset_at = next_daily_boundary(now);
        ledger.last_updated = now;
        self.store
            .put(
                &quota_key(user_id),
                serde_json::to_value(&ledger)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?,
            )
            .await?;
        tracing::info!(user_id, reset_at = %ledger.reset_at, "quota reset");
        Ok(ledger)
    }

    /// Deletes all three persisted records for a session and evicts both
    /// cache entries.
    ///
    /// # Errors
    ///
    /// Propagates the first persistence failure; caches are evicted
    /// regardless so the session cannot be served stale.
    pub async fn invalidate(&self, session: &Session) -> Result<(), GatewayError> {
        self.by_key.write().await.remove(&session.api_key_ref);
        self.by_id.write().await.remove(&session.id);

        let results = [
            self.store.delete(&session_key(session.id)).await,
            self.store.delete(&api_key_key(&session.api_key_ref)).await,
            self.store.delete(&quota_key(&session.user_id)).await,
        ];
        for result in results {
            result?;
        }
        tracing::info!(session_id = %session.id, "session invalidated");
        Ok(())
    }

    async fn load_session_by_key(&self, key: &str) -> Result<Option<Session>, GatewayError> {
        let Some(binding) = self.store.get(&api_key_key(key)).await? else {
            return Ok(None);
        };
        let Some(id) = binding
            .get("sessionId")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<uuid::Uuid>().ok())
        else {
            return Err(GatewayError::PersistenceError(
                "corrupt apikey binding record".to_string(),
            ));
        };
        let Some(raw) = self.store.get(&session_key(SessionId::from_uuid(id))).await? else {
            return Ok(None);
        };
        let session: Session = serde_json::from_value(raw)
            .map_err(|e| GatewayError::PersistenceError(format!("corrupt session record: {e}")))?;
        Ok(Some(session))
    }

    async fn persist_session(&self, session: &Session) -> Result<(), GatewayError> {
        self.store
            .put(
                &session_key(session.id),
                serde_json::to_value(session)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?,
            )
            .await
    }

    async fn cache_get_by_key(&self, key: &str) -> Option<Session> {
        let map = self.by_key.read().await;
        map.get(key)
            .filter(|c| c.cached_at.elapsed() < self.cache_ttl)
            .map(|c| c.session.clone())
    }

    /// Seeds both caches, restarting the validity window.
    async fn cache_insert(&self, session: &Session) {
        let cached = CachedSession {
            session: session.clone(),
            cached_at: Instant::now(),
        };
        self.by_key
            .write()
            .await
            .insert(session.api_key_ref.clone(), cached.clone());
        self.by_id.write().await.insert(session.id, cached);
    }

    /// Updates the cached session in place without restarting the window.
    async fn cache_touch(&self, session: &Session) {
        if let Some(entry) = self.by_key.write().await.get_mut(&session.api_key_ref) {
            entry.session = session.clone();
        }
        if let Some(entry) = self.by_id.write().await.get_mut(&session.id) {
            entry.session = session.clone();
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::MemoryKvStore;

    fn service() -> AuthService {
        AuthService::new(Arc::new(MemoryKvStore::new()), &GatewayConfig::default())
    }

    fn valid_key() -> String {
        "tk_0123456789abcdef0123456789abcdef".to_string()
    }

    #[tokio::test]
    async fn malformed_keys_are_rejected() {
        let auth = service();
        assert!(auth.validate_api_key("short").await.is_none());
        assert!(auth.validate_api_key("").await.is_none());
        let with_space = format!("{} {}", "a".repeat(20), "b".repeat(20));
        assert!(auth.validate_api_key(&with_space).await.is_none());
    }

    #[tokio::test]
    async fn unknown_key_is_not_authenticated() {
        let auth = service();
        assert!(auth.validate_api_key(&valid_key()).await.is_none());
    }

    #[tokio::test]
    async fn create_then_validate_round_trip() {
        let auth = service();
        let created = auth
            .create_session(&valid_key(), "user-1", Permissions::default())
            .await;
        let Ok(created) = created else {
            panic!("session creation failed");
        };

        let validated = auth.validate_api_key(&valid_key()).await;
        let Some(validated) = validated else {
            panic!("expected session");
        };
        assert_eq!(validated.id, created.id);
        assert!(validated.last_activity >= created.last_activity);
    }

    #[tokio::test]
    async fn cache_returns_same_session_id_within_window() {
        let auth = service();
        let _ = auth
            .create_session(&valid_key(), "user-1", Permissions::default())
            .await;
        let first = auth.validate_api_key(&valid_key()).await;
        let second = auth.validate_api_key(&valid_key()).await;
        match (first, second) {
            (Some(a), Some(b)) => assert_eq!(a.id, b.id),
            _ => panic!("both validations should succeed"),
        }
    }

    #[tokio::test]
    async fn session_by_id_serves_from_cache() {
        let auth = service();
        let created = auth
            .create_session(&valid_key(), "user-1", Permissions::default())
            .await;
        let Ok(created) = created else {
            panic!("session creation failed");
        };
        let cached = auth.session_by_id(created.id).await;
        assert_eq!(cached.map(|s| s.id), Some(created.id));
        assert!(auth.session_by_id(SessionId::new()).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_evicts_and_deletes() {
        let auth = service();
        let session = auth
            .create_session(&valid_key(), "user-1", Permissions::default())
            .await;
        let Ok(session) = session else {
            panic!("session creation failed");
        };

        assert!(auth.invalidate(&session).await.is_ok());
        assert!(auth.validate_api_key(&valid_key()).await.is_none());
        assert!(auth.get_quota("user-1").await.ok().flatten().is_none());
    }

    #[tokio::test]
    async fn quota_multiplier_scales_limit() {
        let auth = service();
        let perms = Permissions {
            quota_multiplier: 2.5,
            ..Permissions::default()
        };
        let session = auth.create_session(&valid_key(), "user-1", perms).await;
        let Ok(session) = session else {
            panic!("session creation failed");
        };
        assert_eq!(session.quota_limit, 2_500);
    }

    #[tokio::test]
    async fn quota_accumulates_running_sum() {
        let auth = service();
        let _ = auth
            .create_session(&valid_key(), "user-1", Permissions::default())
            .await;

        for delta in [1, 10, 5] {
            let updated = auth.update_quota("user-1", delta).await;
            assert!(updated.is_ok());
        }
        let ledger = auth.get_quota("user-1").await.ok().flatten();
        let Some(ledger) = ledger else {
            panic!("ledger should exist");
        };
        assert_eq!(ledger.used, 16);
    }

    #[tokio::test]
    async fn availability_is_exact_boundary() {
        let auth = service();
        let _ = auth
            .create_session(&valid_key(), "user-1", Permissions::default())
            .await;
        let _ = auth.update_quota("user-1", 999).await;

        assert!(auth.has_quota_available("user-1", 1).await);
        assert!(!auth.has_quota_available("user-1", 2).await);
    }

    #[tokio::test]
    async fn unknown_user_has_no_quota() {
        let auth = service();
        assert!(!auth.has_quota_available("ghost", 1).await);
        assert!(auth.update_quota("ghost", 1).await.is_err());
        assert!(auth.reset_quota("ghost").await.is_err());
    }

    #[tokio::test]
    async fn reset_zeroes_usage_and_advances_boundary() {
        let auth = service();
        let _ = auth
            .create_session(&valid_key(), "user-1", Permissions::default())
            .await;
        let _ = auth.update_quota("user-1", 42).await;

        let ledger = auth.reset_quota("user-1").await;
        let Ok(ledger) = ledger else {
            panic!("reset failed");
        };
        assert_eq!(ledger.used, 0);
        assert!(ledger.reset_at > Utc::now());
    }
}
