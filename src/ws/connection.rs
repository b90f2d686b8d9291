//! Per-connection receive loop and message dispatch.
//!
//! Each WebSocket runs one cooperative task that owns the socket. The
//! loop selects over inbound frames and the connection's outbound queue;
//! every inbound message is dispatched and its handler awaited to
//! completion before the next frame is read, so messages on a single
//! connection are processed strictly in receive order. Messages across
//! different connections interleave arbitrarily.
//!
//! Dispatch itself is a plain async method over connection state, so the
//! whole message catalogue is unit-testable without a socket.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::messages::{
    AuthenticateParams, SubscriptionParams, ToolCallParams, handshake_notification,
};
use crate::app_state::AppState;
use crate::domain::{InboundEnvelope, ResponseEnvelope, Session};
use crate::error::GatewayError;
use crate::service::{ConnectionHandle, OutboundFrame};

/// Runs the read/write loop for a single WebSocket connection.
///
/// Sends the `handshake` notification, then processes frames until the
/// peer disconnects or a server-initiated close is queued (idle sweep,
/// shutdown, admin close).
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<OutboundFrame>(state.config.outbound_queue_capacity);
    let mut conn = WsConnection::new(state, outbound_tx);

    if ws_tx
        .send(Message::text(handshake_notification().to_json()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = conn.handle_frame(text.as_str()).await {
                            conn.note_sent(reply.len() as u64).await;
                            if ws_tx.send(Message::text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "ws receive error");
                        break;
                    }
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(OutboundFrame::Text(payload)) => {
                        conn.note_sent(payload.len() as u64).await;
                        if ws_tx.send(Message::text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close { code, reason }) => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    conn.cleanup().await;
    tracing::debug!("ws connection closed");
}

/// Message-dispatch state for one connection: the bound session (if
/// authenticated) and the outbound queue handed to the connection
/// manager at registration.
pub struct WsConnection {
    state: AppState,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    session: Option<Session>,
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("session", &self.session.as_ref().map(|s| s.id))
            .finish_non_exhaustive()
    }
}

impl WsConnection {
    /// Creates dispatch state for a freshly accepted, unauthenticated
    /// connection.
    #[must_use]
    pub fn new(state: AppState, outbound_tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            state,
            outbound_tx,
            session: None,
        }
    }

    /// Processes one inbound text frame, returning the serialized reply
    /// (if any). Parse failures produce an `invalid_message` error bound
    /// to a `null` id; handler failures produce an error envelope bound
    /// to the original id. The connection is never closed from here.
    pub async fn handle_frame(&mut self, raw: &str) -> Option<String> {
        if let Some(session) = &self.session {
            self.state
                .connections
                .track_received(session.id, raw.len() as u64)
                .await;
        }

        let envelope = match InboundEnvelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                return Some(ResponseEnvelope::error(Value::Null, &err).to_json());
            }
        };

        let id = envelope.id.clone();
        match self.dispatch(envelope).await {
            Ok(Some(result)) => Some(ResponseEnvelope::result(id, result).to_json()),
            Ok(None) => None,
            Err(err) => {
                if let Some(session) = &self.session {
                    self.state.connections.track_error(session.id, &err).await;
                }
                Some(ResponseEnvelope::error(id, &err).to_json())
            }
        }
    }

    /// Fixed dispatch table over the duplex message catalogue.
    async fn dispatch(&mut self, envelope: InboundEnvelope) -> Result<Option<Value>, GatewayError> {
        match envelope.method.as_str() {
            "authenticate" => self.handle_authenticate(envelope.params).await.map(Some),
            "ping" => self.handle_ping().await.map(Some),
            "pong" => {
                self.touch_ping().await;
                Ok(None)
            }
            "tools/list" => self.handle_tools_list().await.map(Some),
            "tools/call" => self
                .handle_tools_call(&envelope.id, envelope.params)
                .await
                .map(Some),
            "subscribe" => self.handle_subscription(envelope.params, true).await.map(Some),
            "unsubscribe" => self.handle_subscription(envelope.params, false).await.map(Some),
            other => Err(GatewayError::MethodNotFound(other.to_string())),
        }
    }

    async fn handle_authenticate(&mut self, params: Value) -> Result<Value, GatewayError> {
        let params: AuthenticateParams = serde_json::from_value(params)
            .map_err(|e| GatewayError::InvalidRequest(format!("authenticate params: {e}")))?;

        let Some(session) = self.state.auth.validate_api_key(&params.api_key).await else {
            return Err(GatewayError::AuthenticationFailed(
                "Invalid API key".to_string(),
            ));
        };

        // Re-authentication replaces the previous binding.
        if let Some(previous) = self.session.take() {
            self.state.connections.unregister(previous.id).await;
        }

        let handle = Arc::new(ConnectionHandle::new(
            session.id,
            params.client_info.unwrap_or_default(),
            session.permissions.can_receive_notifications,
            self.outbound_tx.clone(),
        ));
        self.state.connections.register(handle).await;
        self.session = Some(session.clone());

        tracing::info!(session_id = %session.id, "connection authenticated");
        Ok(json!({
            "success": true,
            "session": session.summary(),
            "serverInfo": AppState::server_info(),
        }))
    }

    async fn handle_ping(&self) -> Result<Value, GatewayError> {
        self.touch_ping().await;
        Ok(json!({ "pong": true, "timestamp": chrono::Utc::now() }))
    }

    async fn touch_ping(&self) {
        if let Some(session) = &self.session {
            self.state.connections.touch_ping(session.id).await;
        }
    }

    async fn handle_tools_list(&self) -> Result<Value, GatewayError> {
        let session = self.require_session()?;
        self.state.connections.touch_activity(session.id).await;
        let tools = self.state.tools.list().await;
        Ok(json!({ "tools": tools }))
    }

    async fn handle_tools_call(
        &self,
        correlation_id: &Value,
        params: Value,
    ) -> Result<Value, GatewayError> {
        let session = self.require_session()?.clone();
        let params: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| GatewayError::InvalidRequest(format!("tools/call params: {e}")))?;

        let output = self
            .state
            .invoke_tool_for_session(
                &session,
                &params.name,
                params.arguments,
                request_id_from(correlation_id),
            )
            .await?;
        self.state.connections.touch_activity(session.id).await;

        Ok(json!({ "tool": params.name, "result": output }))
    }

    async fn handle_subscription(
        &self,
        params: Value,
        subscribe: bool,
    ) -> Result<Value, GatewayError> {
        let session = self.require_session()?;
        let params: SubscriptionParams = serde_json::from_value(params)
            .map_err(|e| GatewayError::InvalidRequest(format!("subscription params: {e}")))?;

        let subscriptions = if subscribe {
            self.state
                .connections
                .subscribe(session.id, &params.tool_name)
                .await
        } else {
            self.state
                .connections
                .unsubscribe(session.id, &params.tool_name)
                .await
        };
        self.state.connections.touch_activity(session.id).await;

        Ok(json!({
            "success": true,
            "toolName": params.tool_name,
            "subscriptions": subscriptions,
        }))
    }

    fn require_session(&self) -> Result<&Session, GatewayError> {
        self.session.as_ref().ok_or_else(|| {
            GatewayError::AuthenticationFailed("Authentication required".to_string())
        })
    }

    async fn note_sent(&self, bytes: u64) {
        if let Some(session) = &self.session {
            self.state.connections.track_sent(session.id, bytes).await;
        }
    }

    /// Unbinds the connection from the manager when the loop exits.
    pub async fn cleanup(&mut self) {
        if let Some(session) = self.session.take() {
            self.state.connections.unregister(session.id).await;
        }
    }
}

/// Derives the execution-context request id from a correlation id.
fn request_id_from(id: &Value) -> String {
    match id {
        Value::Null => uuid::Uuid::new_v4().to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
