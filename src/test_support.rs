//! Shared fixtures for the test suite: an in-memory application state
//! with the built-in tools registered.

#![allow(clippy::panic)]

use std::sync::Arc;

use crate::app_state::AppState;
use crate::builtins::register_builtin_tools;
use crate::config::GatewayConfig;
use crate::domain::{EventBus, Permissions, Session, ToolRegistry};
use crate::persistence::{KvStore, MemoryKvStore};
use crate::service::{AuthService, ConnectionManager, ToolService};

/// Builds an application state over a fresh in-memory store with the
/// built-in tools registered.
pub(crate) async fn state() -> AppState {
    let config = Arc::new(GatewayConfig::default());
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());

    let auth = Arc::new(AuthService::new(Arc::clone(&store), &config));
    let connections = Arc::new(ConnectionManager::new(Arc::clone(&store), &config));

    let registry = Arc::new(ToolRegistry::new());
    let registered = register_builtin_tools(&registry).await;
    assert!(registered.is_ok(), "builtin registration failed");

    AppState {
        config,
        auth,
        connections,
        tools: Arc::new(ToolService::new(registry)),
        event_bus: EventBus::new(64),
    }
}

/// Like [`state`], plus a provisioned session and its API key.
pub(crate) async fn state_with_session() -> (AppState, Session, String) {
    state_with_restricted_session(Vec::new()).await
}

/// Like [`state_with_session`], restricting the session to the given
/// tool list (empty = unrestricted).
pub(crate) async fn state_with_restricted_session(
    allowed_tools: Vec<String>,
) -> (AppState, Session, String) {
    let state = state().await;
    let api_key = format!("tk_{}", "a".repeat(40));
    let permissions = Permissions {
        allowed_tools,
        ..Permissions::default()
    };
    let session = state
        .auth
        .create_session(&api_key, "user-test", permissions)
        .await;
    let Ok(session) = session else {
        panic!("session provisioning failed");
    };
    (state, session, api_key)
}
