//! Shared application state injected into all Axum handlers.
//!
//! One explicit context object is constructed at startup and passed by
//! reference everywhere; no component reads ambient global state.

use std::sync::Arc;

use serde_json::Value;

use crate::config::GatewayConfig;
use crate::domain::{EventBus, Session, ToolContext};
use crate::error::GatewayError;
use crate::service::{AuthService, ConnectionManager, ToolService};

/// Shared application state available to all handlers via Axum's
/// `State` extractor and to the WebSocket connection tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Startup configuration.
    pub config: Arc<GatewayConfig>,
    /// Authentication, session cache and quota service.
    pub auth: Arc<AuthService>,
    /// Live-connection index and metrics.
    pub connections: Arc<ConnectionManager>,
    /// Tool registry and execution pipeline.
    pub tools: Arc<ToolService>,
    /// Event bus for push-event fan-out.
    pub event_bus: EventBus,
}

impl AppState {
    /// Gateway identity advertised in handshakes and health responses.
    #[must_use]
    pub fn server_info() -> serde_json::Value {
        serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    /// Methods the duplex transport accepts, advertised in the handshake.
    #[must_use]
    pub const fn capabilities() -> [&'static str; 7] {
        [
            "authenticate",
            "ping",
            "tools/list",
            "tools/call",
            "subscribe",
            "unsubscribe",
            "event",
        ]
    }

    /// The tool-invocation sequence shared by both transports:
    /// permission check, quota availability, execution, quota charge.
    ///
    /// Quota is charged only after a successful execution; the charge is
    /// a write-path persistence operation and its failure propagates.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::AuthorizationFailed`] if the session's
    ///   permissions exclude the tool.
    /// - [`GatewayError::QuotaExceeded`] if the call would not fit.
    /// - Anything [`ToolService::execute`] returns.
    pub async fn invoke_tool_for_session(
        &self,
        session: &Session,
        name: &str,
        arguments: Value,
        request_id: String,
    ) -> Result<Value, GatewayError> {
        if !session.permissions.allows_tool(name) {
            return Err(GatewayError::AuthorizationFailed(format!(
                "tool {name} is not allowed for this session"
            )));
        }

        let cost = self.config.tool_call_cost;
        self.auth.ensure_quota(&session.user_id, cost).await?;

        let ctx = ToolContext::for_session(request_id, session);
        let input = if arguments.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            arguments
        };
        let output = self.tools.execute(name, input, &ctx).await?;

        self.auth.update_quota(&session.user_id, cost).await?;
        Ok(output)
    }
}
