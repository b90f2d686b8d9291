//! Typed parameter shapes for the duplex message catalogue.
//!
//! The envelope itself lives in [`crate::domain::envelope`]; this module
//! holds the per-method parameter structs and the server-initiated
//! notification payloads.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::app_state::AppState;
use crate::domain::Notification;
use crate::service::ConnectionMetadata;

/// Parameters of the `authenticate` method.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateParams {
    /// The caller's API key.
    pub api_key: String,
    /// Optional client metadata recorded on the connection.
    #[serde(default)]
    pub client_info: Option<ConnectionMetadata>,
}

/// Parameters of the `tools/call` method.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Tool name to invoke.
    pub name: String,
    /// Tool input, validated against the descriptor schema.
    #[serde(default)]
    pub arguments: Value,
}

/// Parameters of `subscribe` / `unsubscribe`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionParams {
    /// Tool name whose events to (un)subscribe.
    pub tool_name: String,
}

/// Builds the `handshake` notification sent on connect.
#[must_use]
pub fn handshake_notification() -> Notification {
    Notification::new(
        "handshake",
        json!({
            "capabilities": AppState::capabilities(),
            "authRequired": true,
            "serverInfo": AppState::server_info(),
        }),
    )
}

/// Builds the `event` notification pushed to subscribers.
#[must_use]
pub fn event_notification(topic: Option<&str>, payload: &Value, timestamp: &str) -> Notification {
    Notification::new(
        "event",
        json!({
            "topic": topic,
            "payload": payload,
            "timestamp": timestamp,
        }),
    )
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn handshake_advertises_auth_requirement() {
        let raw = handshake_notification().to_json();
        let value: Value = serde_json::from_str(&raw).unwrap_or_default();
        assert_eq!(value.pointer("/params/authRequired"), Some(&json!(true)));
        let capabilities = value
            .pointer("/params/capabilities")
            .and_then(Value::as_array);
        let Some(capabilities) = capabilities else {
            panic!("capabilities should be a list");
        };
        assert!(capabilities.contains(&json!("tools/call")));
    }

    #[test]
    fn authenticate_params_accept_client_info() {
        let params: Result<AuthenticateParams, _> = serde_json::from_value(json!({
            "apiKey": "k".repeat(32),
            "clientInfo": {"platform": "linux", "userAgent": "cli/1.0"}
        }));
        let Ok(params) = params else {
            panic!("params should deserialize");
        };
        assert_eq!(
            params.client_info.and_then(|m| m.platform),
            Some("linux".to_string())
        );
    }

    #[test]
    fn tool_call_arguments_default_to_null() {
        let params: Result<ToolCallParams, _> =
            serde_json::from_value(json!({"name": "echo"}));
        let Ok(params) = params else {
            panic!("params should deserialize");
        };
        assert_eq!(params.arguments, Value::Null);
    }
}
