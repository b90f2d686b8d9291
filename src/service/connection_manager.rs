//! Live-connection index, metrics and idle reclamation.
//!
//! [`ConnectionManager`] is the single source of truth for connection
//! metadata and counters, independent of message semantics. The transport
//! registers a connection here once it is bound to a session; a periodic
//! sweep reclaims idle connections and shutdown force-closes the rest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::domain::SessionId;
use crate::error::GatewayError;
use crate::persistence::{KvStore, connection_key};

/// Close code for idle-timeout reclamation.
pub const CLOSE_CODE_IDLE: u16 = 4000;
/// Close code for server shutdown.
pub const CLOSE_CODE_SHUTDOWN: u16 = 1001;
/// Close code for administrative closes.
pub const CLOSE_CODE_ADMIN: u16 = 4001;

/// Client-reported connection metadata, captured at authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    /// Client user agent string.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Client platform identifier.
    #[serde(default)]
    pub platform: Option<String>,
    /// Client version string.
    #[serde(default)]
    pub client_version: Option<String>,
}

/// Frame queued for a connection's write half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A serialized text frame.
    Text(String),
    /// A graceful close with code and human-readable reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable reason string.
        reason: String,
    },
}

#[derive(Debug)]
struct ConnectionState {
    last_activity: DateTime<Utc>,
    last_ping_at: Option<DateTime<Utc>>,
    subscriptions: HashSet<String>,
    bytes_sent: u64,
    bytes_received: u64,
    messages_received: u64,
    error_count: u64,
}

/// One registered live connection: immutable identity plus mutable state.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Session this connection is bound to.
    pub session_id: SessionId,
    /// When the channel was accepted.
    pub connected_at: DateTime<Utc>,
    /// Client metadata supplied at authentication.
    pub metadata: ConnectionMetadata,
    /// Snapshot of the session's notification permission.
    pub can_receive_notifications: bool,
    sender: mpsc::Sender<OutboundFrame>,
    state: RwLock<ConnectionState>,
}

impl ConnectionHandle {
    /// Creates a handle wired to the given outbound queue.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        metadata: ConnectionMetadata,
        can_receive_notifications: bool,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            connected_at: now,
            metadata,
            can_receive_notifications,
            sender,
            state: RwLock::new(ConnectionState {
                last_activity: now,
                last_ping_at: None,
                subscriptions: HashSet::new(),
                bytes_sent: 0,
                bytes_received: 0,
                messages_received: 0,
                error_count: 0,
            }),
        }
    }

    /// Queues a text frame for this connection.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the write half is gone or
    /// the outbound queue is full.
    pub fn send_text(&self, payload: String) -> Result<(), GatewayError> {
        self.sender
            .try_send(OutboundFrame::Text(payload))
            .map_err(|e| GatewayError::Internal(format!("outbound queue: {e}")))
    }

    /// Queues a graceful close frame for this connection.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the write half is gone.
    pub fn send_close(&self, code: u16, reason: &str) -> Result<(), GatewayError> {
        self.sender
            .try_send(OutboundFrame::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|e| GatewayError::Internal(format!("outbound queue: {e}")))
    }

    /// Returns `true` if this connection is subscribed to `topic`.
    pub async fn is_subscribed(&self, topic: &str) -> bool {
        self.state.read().await.subscriptions.contains(topic)
    }

    /// Timestamp of the last tracked activity.
    pub async fn last_activity(&self) -> DateTime<Utc> {
        self.state.read().await.last_activity
    }

    #[cfg(test)]
    pub(crate) async fn backdate_activity(&self, by: Duration) {
        let mut state = self.state.write().await;
        state.last_activity = Utc::now()
            - chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

/// Criteria for batch-closing connections.
#[derive(Debug, Clone)]
pub enum CloseCriteria {
    /// Close exactly these sessions.
    Sessions(Vec<SessionId>),
    /// Close every connection matching all supplied predicates.
    Predicate {
        /// Match this client platform (exact, case-insensitive).
        platform: Option<String>,
        /// Match connections connected at least this long.
        min_connected_time: Option<Duration>,
        /// Match connections idle at least this long.
        max_idle_time: Option<Duration>,
    },
    /// Close every registered connection.
    All,
}

/// Aggregate connection metrics for health and stats endpoints.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Registered connections.
    pub total_connections: usize,
    /// Connections with activity inside the trailing window.
    pub active_connections: usize,
    /// Mean connection age in seconds.
    pub avg_connection_age_secs: f64,
    /// Aggregate bytes written.
    pub total_bytes_sent: u64,
    /// Aggregate bytes read.
    pub total_bytes_received: u64,
    /// Aggregate tracked errors.
    pub total_errors: u64,
    /// Errors per received message (0 when nothing received).
    pub error_rate: f64,
}

/// Single source of truth for live-connection metadata and metrics.
pub struct ConnectionManager {
    store: Arc<dyn KvStore>,
    record_ttl: Duration,
    active_window: Duration,
    idle_timeout: Duration,
    connections: RwLock<HashMap<SessionId, Arc<ConnectionHandle>>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("record_ttl", &self.record_ttl)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, config: &GatewayConfig) -> Self {
        Self {
            store,
            record_ttl: config.connection_record_ttl,
            active_window: config.active_window,
            idle_timeout: config.idle_timeout,
            connections: RwLock::new(HashMap::new()),
            sweep: Mutex::new(None),
        }
    }

    /// Adds a connection to the index and persists its bounded-TTL record.
    ///
    /// A failed record write is logged and does not reject the
    /// registration; the record is advisory, the index is authoritative.
    pub async fn register(&self, handle: Arc<ConnectionHandle>) {
        let session_id = handle.session_id;
        let record = serde_json::json!({
            "sessionId": session_id,
            "connectedAt": handle.connected_at,
            "metadata": handle.metadata,
        });
        if let Err(err) = self
            .store
            .put_with_ttl(&connection_key(session_id), record, self.record_ttl)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %err, "failed to persist connection record");
        }
        self.connections.write().await.insert(session_id, handle);
        tracing::info!(session_id = %session_id, "connection registered");
    }

    /// Removes a connection from the index and deletes its record.
    pub async fn unregister(&self, session_id: SessionId) {
        let removed = self.connections.write().await.remove(&session_id);
        if removed.is_some() {
            tracing::info!(session_id = %session_id, "connection unregistered");
        }
        if let Err(err) = self.store.delete(&connection_key(session_id)).await {
            tracing::warn!(session_id = %session_id, error = %err, "failed to delete connection record");
        }
    }

    /// Returns the handle for a registered session.
    pub async fn get_connection(&self, session_id: SessionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().await.get(&session_id).cloned()
    }

    /// Returns handles for every registered connection.
    pub async fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Refreshes a connection's activity timestamp.
    pub async fn touch_activity(&self, session_id: SessionId) {
        if let Some(handle) = self.get_connection(session_id).await {
            handle.state.write().await.last_activity = Utc::now();
        }
    }

    /// Records a keepalive, refreshing both ping and activity timestamps.
    pub async fn touch_ping(&self, session_id: SessionId) {
        if let Some(handle) = self.get_connection(session_id).await {
            let mut state = handle.state.write().await;
            let now = Utc::now();
            state.last_ping_at = Some(now);
            state.last_activity = now;
        }
    }

    /// Adds outbound bytes to a connection's counters.
    pub async fn track_sent(&self, session_id: SessionId, bytes: u64) {
        if let Some(handle) = self.get_connection(session_id).await {
            handle.state.write().await.bytes_sent += bytes;
        }
    }

    /// Adds inbound bytes and one message to a connection's counters.
    pub async fn track_received(&self, session_id: SessionId, bytes: u64) {
        if let Some(handle) = self.get_connection(session_id).await {
            let mut state = handle.state.write().await;
            state.bytes_received += bytes;
            state.messages_received += 1;
        }
    }

    /// Increments a connection's error counter.
    pub async fn track_error(&self, session_id: SessionId, err: &GatewayError) {
        if let Some(handle) = self.get_connection(session_id).await {
            handle.state.write().await.error_count += 1;
            tracing::debug!(session_id = %session_id, error = %err, "connection error tracked");
        }
    }

    /// Adds `tool` to a connection's subscription set (idempotent) and
    /// returns the current sorted subscription list.
    pub async fn subscribe(&self, session_id: SessionId, tool: &str) -> Vec<String> {
        self.with_subscriptions(session_id, |subs| {
            subs.insert(tool.to_string());
        })
        .await
    }

    /// Removes `tool` from a connection's subscription set (idempotent,
    /// a no-op removal still succeeds) and returns the current list.
    pub async fn unsubscribe(&self, session_id: SessionId, tool: &str) -> Vec<String> {
        self.with_subscriptions(session_id, |subs| {
            subs.remove(tool);
        })
        .await
    }

    async fn with_subscriptions(
        &self,
        session_id: SessionId,
        mutate: impl FnOnce(&mut HashSet<String>),
    ) -> Vec<String> {
        let Some(handle) = self.get_connection(session_id).await else {
            return Vec::new();
        };
        let mut state = handle.state.write().await;
        mutate(&mut state.subscriptions);
        let mut current: Vec<String> = state.subscriptions.iter().cloned().collect();
        current.sort();
        current
    }

    /// Computes aggregate stats over all registered connections.
    pub async fn stats(&self) -> ConnectionStats {
        let handles = self.all_connections().await;
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.active_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let total = handles.len();
        let mut active = 0;
        let mut age_sum = 0.0;
        let mut bytes_sent = 0;
        let mut bytes_received = 0;
        let mut messages = 0;
        let mut errors = 0;

        for handle in &handles {
            let state = handle.state.read().await;
            if now - state.last_activity <= window {
                active += 1;
            }
            age_sum += (now - handle.connected_at).num_milliseconds() as f64 / 1_000.0;
            bytes_sent += state.bytes_sent;
            bytes_received += state.bytes_received;
            messages += state.messages_received;
            errors += state.error_count;
        }

        ConnectionStats {
            total_connections: total,
            active_connections: active,
            avg_connection_age_secs: if total == 0 {
                0.0
            } else {
                age_sum / total as f64
            },
            total_bytes_sent: bytes_sent,
            total_bytes_received: bytes_received,
            total_errors: errors,
            error_rate: if messages == 0 {
                0.0
            } else {
                errors as f64 / messages as f64
            },
        }
    }

    /// Gracefully closes every connection matching `criteria`, then
    /// unregisters it. Per-connection close failures are logged and do
    /// not stop the batch. Returns the number of connections closed.
    pub async fn close_by_criteria(
        &self,
        criteria: &CloseCriteria,
        code: u16,
        reason: &str,
    ) -> usize {
        let matches = self.resolve_matches(criteria).await;
        let mut closed = 0;
        for handle in matches {
            if let Err(err) = handle.send_close(code, reason) {
                tracing::warn!(
                    session_id = %handle.session_id,
                    error = %err,
                    "graceful close failed"
                );
            }
            self.unregister(handle.session_id).await;
            closed += 1;
        }
        if closed > 0 {
            tracing::info!(closed, reason, "closed connections by criteria");
        }
        closed
    }

    async fn resolve_matches(&self, criteria: &CloseCriteria) -> Vec<Arc<ConnectionHandle>> {
        match criteria {
            CloseCriteria::Sessions(ids) => {
                let map = self.connections.read().await;
                ids.iter().filter_map(|id| map.get(id).cloned()).collect()
            }
            CloseCriteria::All => self.all_connections().await,
            CloseCriteria::Predicate {
                platform,
                min_connected_time,
                max_idle_time,
            } => {
                let now = Utc::now();
                let mut matched = Vec::new();
                for handle in self.all_connections().await {
                    if let Some(platform) = platform {
                        let matches_platform = handle
                            .metadata
                            .platform
                            .as_deref()
                            .is_some_and(|p| p.eq_ignore_ascii_case(platform));
                        if !matches_platform {
                            continue;
                        }
                    }
                    if let Some(min) = min_connected_time {
                        let age = now - handle.connected_at;
                        if age < chrono::Duration::from_std(*min).unwrap_or_default() {
                            continue;
                        }
                    }
                    if let Some(max) = max_idle_time {
                        let idle = now - handle.last_activity().await;
                        if idle < chrono::Duration::from_std(*max).unwrap_or_default() {
                            continue;
                        }
                    }
                    matched.push(handle);
                }
                matched
            }
        }
    }

    /// Starts the periodic idle sweep. Replaces any previous sweep task.
    pub async fn start_sweep(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        let idle_timeout = manager.idle_timeout;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so a fresh server
            // does not sweep before anything can connect.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let criteria = CloseCriteria::Predicate {
                    platform: None,
                    min_connected_time: None,
                    max_idle_time: Some(idle_timeout),
                };
                let closed = manager
                    .close_by_criteria(&criteria, CLOSE_CODE_IDLE, "idle timeout")
                    .await;
                if closed > 0 {
                    tracing::info!(closed, "idle sweep reclaimed connections");
                }
            }
        });
        if let Some(previous) = self.sweep.lock().await.replace(task) {
            previous.abort();
        }
    }

    /// Cancels the sweep, force-closes every remaining connection with a
    /// shutdown reason and clears internal state.
    pub async fn shutdown(&self) {
        if let Some(task) = self.sweep.lock().await.take() {
            task.abort();
        }
        let closed = self
            .close_by_criteria(&CloseCriteria::All, CLOSE_CODE_SHUTDOWN, "server shutting down")
            .await;
        self.connections.write().await.clear();
        tracing::info!(closed, "connection manager shut down");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::MemoryKvStore;

    fn manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            Arc::new(MemoryKvStore::new()),
            &GatewayConfig::default(),
        ))
    }

    fn handle_with_rx(
        metadata: ConnectionMetadata,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = Arc::new(ConnectionHandle::new(SessionId::new(), metadata, true, tx));
        (handle, rx)
    }

    #[tokio::test]
    async fn register_then_get_returns_handle() {
        let mgr = manager();
        let (handle, _rx) = handle_with_rx(ConnectionMetadata::default());
        let id = handle.session_id;

        mgr.register(Arc::clone(&handle)).await;
        assert!(mgr.get_connection(id).await.is_some());
        assert_eq!(mgr.stats().await.total_connections, 1);

        mgr.unregister(id).await;
        assert!(mgr.get_connection(id).await.is_none());
        assert_eq!(mgr.stats().await.total_connections, 0);
    }

    #[tokio::test]
    async fn counters_aggregate_into_stats() {
        let mgr = manager();
        let (handle, _rx) = handle_with_rx(ConnectionMetadata::default());
        let id = handle.session_id;
        mgr.register(handle).await;

        mgr.track_sent(id, 100).await;
        mgr.track_received(id, 40).await;
        mgr.track_received(id, 60).await;
        mgr.track_error(id, &GatewayError::Internal("boom".to_string()))
            .await;

        let stats = mgr.stats().await;
        assert_eq!(stats.total_bytes_sent, 100);
        assert_eq!(stats.total_bytes_received, 100);
        assert_eq!(stats.total_errors, 1);
        assert!((stats.error_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.active_connections, 1);
    }

    #[tokio::test]
    async fn subscriptions_are_idempotent_both_ways() {
        let mgr = manager();
        let (handle, _rx) = handle_with_rx(ConnectionMetadata::default());
        let id = handle.session_id;
        mgr.register(Arc::clone(&handle)).await;

        assert_eq!(mgr.subscribe(id, "echo").await, vec!["echo".to_string()]);
        assert_eq!(mgr.subscribe(id, "echo").await, vec!["echo".to_string()]);
        assert!(handle.is_subscribed("echo").await);

        assert!(mgr.unsubscribe(id, "echo").await.is_empty());
        // Unsubscribing a tool never subscribed is a no-op that succeeds.
        assert!(mgr.unsubscribe(id, "never").await.is_empty());
    }

    #[tokio::test]
    async fn close_by_ids_sends_close_frame() {
        let mgr = manager();
        let (handle, mut rx) = handle_with_rx(ConnectionMetadata::default());
        let id = handle.session_id;
        mgr.register(handle).await;

        let closed = mgr
            .close_by_criteria(
                &CloseCriteria::Sessions(vec![id]),
                CLOSE_CODE_ADMIN,
                "admin close",
            )
            .await;
        assert_eq!(closed, 1);
        assert!(mgr.get_connection(id).await.is_none());

        let frame = rx.recv().await;
        assert_eq!(
            frame,
            Some(OutboundFrame::Close {
                code: CLOSE_CODE_ADMIN,
                reason: "admin close".to_string()
            })
        );
    }

    #[tokio::test]
    async fn idle_criteria_closes_only_idle_connections() {
        let mgr = manager();
        let mut receivers = Vec::new();
        let mut idle_ids = Vec::new();

        for i in 0..1_000 {
            let (handle, rx) = handle_with_rx(ConnectionMetadata::default());
            receivers.push(rx);
            if i % 4 == 0 {
                handle.backdate_activity(Duration::from_secs(700)).await;
                idle_ids.push(handle.session_id);
            }
            mgr.register(handle).await;
        }

        let criteria = CloseCriteria::Predicate {
            platform: None,
            min_connected_time: None,
            max_idle_time: Some(Duration::from_secs(600)),
        };
        let closed = mgr
            .close_by_criteria(&criteria, CLOSE_CODE_IDLE, "idle timeout")
            .await;

        assert_eq!(closed, 250);
        assert_eq!(mgr.stats().await.total_connections, 750);
        for id in idle_ids {
            assert!(mgr.get_connection(id).await.is_none());
        }
    }

    #[tokio::test]
    async fn platform_predicate_filters() {
        let mgr = manager();
        let (linux, _rx1) = handle_with_rx(ConnectionMetadata {
            platform: Some("linux".to_string()),
            ..ConnectionMetadata::default()
        });
        let (macos, _rx2) = handle_with_rx(ConnectionMetadata {
            platform: Some("macos".to_string()),
            ..ConnectionMetadata::default()
        });
        mgr.register(linux).await;
        mgr.register(Arc::clone(&macos)).await;

        let criteria = CloseCriteria::Predicate {
            platform: Some("LINUX".to_string()),
            min_connected_time: None,
            max_idle_time: None,
        };
        let closed = mgr
            .close_by_criteria(&criteria, CLOSE_CODE_ADMIN, "platform purge")
            .await;
        assert_eq!(closed, 1);
        assert!(mgr.get_connection(macos.session_id).await.is_some());
    }

    #[tokio::test]
    async fn close_continues_past_dead_channels() {
        let mgr = manager();
        let (dead, rx) = handle_with_rx(ConnectionMetadata::default());
        drop(rx);
        let (alive, mut alive_rx) = handle_with_rx(ConnectionMetadata::default());
        mgr.register(dead).await;
        mgr.register(alive).await;

        let closed = mgr
            .close_by_criteria(&CloseCriteria::All, CLOSE_CODE_SHUTDOWN, "server shutting down")
            .await;
        assert_eq!(closed, 2);
        assert_eq!(mgr.stats().await.total_connections, 0);
        assert!(matches!(
            alive_rx.recv().await,
            Some(OutboundFrame::Close { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_clears_everything() {
        let mgr = manager();
        mgr.start_sweep(Duration::from_secs(3_600)).await;
        let (handle, _rx) = handle_with_rx(ConnectionMetadata::default());
        mgr.register(handle).await;

        mgr.shutdown().await;
        assert_eq!(mgr.stats().await.total_connections, 0);
        assert!(mgr.sweep.lock().await.is_none());
    }
}
