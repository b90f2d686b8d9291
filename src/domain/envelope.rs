//! Request/response envelope shared by both transports.
//!
//! The same `{id, type, params}` → `{id, result | error}` shape is used
//! on the WebSocket channel and the JSON-RPC style HTTP endpoint. The
//! correlation `id` is echoed back verbatim, including `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorBody, GatewayError};

/// Inbound request envelope.
///
/// Accepts `type` or `method` as the discriminator and `params` or
/// `arguments` as the payload, since both transports feed this shape.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    /// Correlation id, echoed back verbatim. Absent ids behave as `null`.
    #[serde(default)]
    pub id: Value,
    /// Method name, e.g. `tools/call`.
    #[serde(rename = "type", alias = "method")]
    pub method: String,
    /// Method parameters.
    #[serde(default, alias = "arguments")]
    pub params: Value,
}

impl InboundEnvelope {
    /// Parses a raw text frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ParseError`] on malformed JSON or a frame
    /// without a method discriminator.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(raw).map_err(|e| GatewayError::ParseError(e.to_string()))
    }
}

/// Outbound response envelope: `result` XOR `error`, never both.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    /// Correlation id from the request, echoed verbatim (may be `null`).
    pub id: Value,
    /// Always `"response"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResponseEnvelope {
    /// Builds a success response bound to the given correlation id.
    #[must_use]
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            id,
            kind: "response",
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response bound to the given correlation id.
    #[must_use]
    pub fn error(id: Value, err: &GatewayError) -> Self {
        Self {
            id,
            kind: "response",
            result: None,
            error: Some(err.to_body()),
        }
    }

    /// Serializes the envelope to a JSON string.
    ///
    /// Serialization of a `Value` tree cannot fail in practice; a failure
    /// is downgraded to a minimal hand-built error frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"id":null,"type":"response","error":{"code":"internal_error","message":"serialization failed"}}"#
                .to_string()
        })
    }
}

/// Server-initiated notification (no correlation id): `handshake`, `event`.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Notification discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Notification payload.
    pub params: Value,
}

impl Notification {
    /// Builds a notification of the given kind.
    #[must_use]
    pub fn new(kind: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }

    /// Serializes the notification to a JSON string.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"event","params":null}"#.to_string()
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_type_discriminator() {
        let env = InboundEnvelope::parse(r#"{"id":1,"type":"ping"}"#);
        let Ok(env) = env else {
            panic!("expected parse to succeed");
        };
        assert_eq!(env.method, "ping");
        assert_eq!(env.id, json!(1));
        assert_eq!(env.params, Value::Null);
    }

    #[test]
    fn parses_method_alias_and_arguments_alias() {
        let env =
            InboundEnvelope::parse(r#"{"id":"a","method":"tools/call","arguments":{"name":"echo"}}"#);
        let Ok(env) = env else {
            panic!("expected parse to succeed");
        };
        assert_eq!(env.method, "tools/call");
        assert_eq!(env.params, json!({"name": "echo"}));
    }

    #[test]
    fn missing_id_defaults_to_null() {
        let env = InboundEnvelope::parse(r#"{"type":"ping"}"#);
        let Ok(env) = env else {
            panic!("expected parse to succeed");
        };
        assert_eq!(env.id, Value::Null);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = InboundEnvelope::parse("{nope");
        assert!(matches!(err, Err(GatewayError::ParseError(_))));
    }

    #[test]
    fn null_id_is_echoed_verbatim() {
        let resp = ResponseEnvelope::result(Value::Null, json!({"ok": true}));
        let raw = resp.to_json();
        let value: Value = serde_json::from_str(&raw).unwrap_or_default();
        assert_eq!(value.get("id"), Some(&Value::Null));
        assert_eq!(value.get("type").and_then(|v| v.as_str()), Some("response"));
    }

    #[test]
    fn error_envelope_excludes_result() {
        let err = GatewayError::ToolNotFound("weather".to_string());
        let resp = ResponseEnvelope::error(json!(7), &err);
        let raw = resp.to_json();
        let value: Value = serde_json::from_str(&raw).unwrap_or_default();
        assert_eq!(value.get("id"), Some(&json!(7)));
        assert!(value.get("result").is_none());
        assert_eq!(
            value.pointer("/error/code").and_then(|v| v.as_str()),
            Some("tool_not_found")
        );
    }

    #[test]
    fn notification_carries_kind_and_params() {
        let note = Notification::new("handshake", json!({"authRequired": true}));
        let value: Value = serde_json::from_str(&note.to_json()).unwrap_or_default();
        assert_eq!(value.get("type").and_then(|v| v.as_str()), Some("handshake"));
        assert_eq!(
            value.pointer("/params/authRequired"),
            Some(&Value::Bool(true))
        );
    }
}
