//! Authenticated session model: identity, permissions, quota ledger.

use std::fmt;

use chrono::{DateTime, Days, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an authenticated session.
///
/// Wraps a UUID v4. Minted once at session creation and immutable
/// thereafter. Used as the key in the connection index and in the
/// `session:{id}` persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Creates a new random `SessionId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `SessionId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-session permission set, fixed at session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permissions {
    /// Tool names this session may invoke. Empty means all tools.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Multiplier applied to the base quota limit.
    #[serde(default = "default_multiplier")]
    pub quota_multiplier: f64,
    /// Whether the session may read the shared result cache.
    #[serde(default)]
    pub can_access_shared_cache: bool,
    /// Whether the session receives server-push events.
    #[serde(default = "default_true")]
    pub can_receive_notifications: bool,
}

fn default_multiplier() -> f64 {
    1.0
}

const fn default_true() -> bool {
    true
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            allowed_tools: Vec::new(),
            quota_multiplier: 1.0,
            can_access_shared_cache: false,
            can_receive_notifications: true,
        }
    }
}

impl Permissions {
    /// Returns `true` if this permission set allows invoking `tool`.
    ///
    /// An empty `allowed_tools` list is unrestricted.
    #[must_use]
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool)
    }
}

/// Authenticated identity bound to an API key.
///
/// Persisted at `session:{id}` and cached in-process by both session id
/// and API key. `quota_used` is monotonically non-decreasing between
/// resets; `last_activity` is refreshed on every authenticated action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier (immutable).
    pub id: SessionId,
    /// Stable user identifier owning the quota ledger.
    pub user_id: String,
    /// The API key this session was minted from.
    pub api_key_ref: String,
    /// Quota units consumed in the current window.
    pub quota_used: u64,
    /// Quota units available per window.
    pub quota_limit: u64,
    /// Creation timestamp (immutable).
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last authenticated action.
    pub last_activity: DateTime<Utc>,
    /// Permission set fixed at creation.
    pub permissions: Permissions,
}

impl Session {
    /// Creates a new session with zero usage.
    #[must_use]
    pub fn new(user_id: String, api_key: String, quota_limit: u64, permissions: Permissions) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            user_id,
            api_key_ref: api_key,
            quota_used: 0,
            quota_limit,
            created_at: now,
            last_activity: now,
            permissions,
        }
    }

    /// Refreshes `last_activity` to now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Returns the client-visible view of this session.
    ///
    /// The API key is never echoed back to clients.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            user_id: self.user_id.clone(),
            quota_used: self.quota_used,
            quota_limit: self.quota_limit,
            created_at: self.created_at,
        }
    }
}

/// Client-visible session fields, without the API key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session identifier.
    pub id: SessionId,
    /// Stable user identifier.
    pub user_id: String,
    /// Quota units consumed in the current window.
    pub quota_used: u64,
    /// Quota units available per window.
    pub quota_limit: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Per-user quota ledger, persisted at `quota:{user_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaLedger {
    /// Units consumed since the last reset.
    pub used: u64,
    /// Units available per window.
    pub limit: u64,
    /// When the ledger next resets to zero.
    pub reset_at: DateTime<Utc>,
    /// Timestamp of the last mutation.
    pub last_updated: DateTime<Utc>,
}

impl QuotaLedger {
    /// Creates a fresh ledger with zero usage, resetting at the next
    /// daily boundary.
    #[must_use]
    pub fn new(limit: u64) -> Self {
        let now = Utc::now();
        Self {
            used: 0,
            limit,
            reset_at: next_daily_boundary(now),
            last_updated: now,
        }
    }

    /// Returns `true` if `cost` more units fit under the limit.
    #[must_use]
    pub const fn has_available(&self, cost: u64) -> bool {
        self.used.saturating_add(cost) <= self.limit
    }

    /// Percentage of the limit consumed, 0.0 for an unlimited ledger.
    #[must_use]
    pub fn percent_used(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            (self.used as f64 / self.limit as f64) * 100.0
        }
    }
}

/// Returns the next fixed daily quota boundary (UTC midnight) after `now`.
#[must_use]
pub fn next_daily_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or_else(|| now + chrono::Duration::days(1), |dt| dt.and_utc())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn empty_allowed_tools_means_all() {
        let perms = Permissions::default();
        assert!(perms.allows_tool("echo"));
        assert!(perms.allows_tool("anything"));
    }

    #[test]
    fn allowed_tools_restricts_membership() {
        let perms = Permissions {
            allowed_tools: vec!["echo".to_string()],
            ..Permissions::default()
        };
        assert!(perms.allows_tool("echo"));
        assert!(!perms.allows_tool("current_time"));
    }

    #[test]
    fn summary_omits_api_key() {
        let session = Session::new(
            "user-1".to_string(),
            "k".repeat(32),
            1000,
            Permissions::default(),
        );
        let json = serde_json::to_value(session.summary()).unwrap_or_default();
        assert!(json.get("apiKeyRef").is_none());
        assert!(json.get("api_key_ref").is_none());
        assert_eq!(json.get("quotaLimit").and_then(|v| v.as_u64()), Some(1000));
    }

    #[test]
    fn ledger_availability() {
        let mut ledger = QuotaLedger::new(10);
        assert!(ledger.has_available(10));
        assert!(!ledger.has_available(11));
        ledger.used = 8;
        assert!(ledger.has_available(2));
        assert!(!ledger.has_available(3));
    }

    #[test]
    fn percent_used_handles_zero_limit() {
        let ledger = QuotaLedger::new(0);
        assert!((ledger.percent_used() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn boundary_is_next_utc_midnight() {
        let now = Utc::now();
        let boundary = next_daily_boundary(now);
        assert!(boundary > now);
        assert_eq!(boundary.time(), chrono::NaiveTime::MIN);
        assert!(boundary - now <= chrono::Duration::days(1));
    }

    #[test]
    fn session_round_trips_through_json() {
        let session = Session::new(
            "user-1".to_string(),
            "k".repeat(32),
            500,
            Permissions::default(),
        );
        let json = serde_json::to_string(&session).ok();
        let Some(json) = json else {
            panic!("serialization failed");
        };
        let back: Option<Session> = serde_json::from_str(&json).ok();
        let Some(back) = back else {
            panic!("deserialization failed");
        };
        assert_eq!(back.id, session.id);
        assert_eq!(back.quota_limit, 500);
    }
}
