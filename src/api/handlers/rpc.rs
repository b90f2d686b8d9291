//! JSON-RPC style endpoint sharing the duplex message catalogue.
//!
//! `POST /api/v1/rpc` accepts the same `{id, method, params}` envelope
//! the WebSocket carries, supports `tools/list` and `tools/call`, and
//! always answers with a response envelope. The correlation id is echoed
//! verbatim, including `null`; the HTTP status comes from the mapped
//! error code.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use super::tools::session_from_headers;
use crate::app_state::AppState;
use crate::domain::{InboundEnvelope, ResponseEnvelope};
use crate::error::GatewayError;
use crate::ws::messages::ToolCallParams;

/// `POST /rpc` — Envelope-style tool access over stateless HTTP.
#[utoipa::path(
    post,
    path = "/api/v1/rpc",
    tag = "Tools",
    summary = "JSON-RPC style tool access",
    description = "Accepts `{id, method, params}` envelopes for `tools/list` and `tools/call`. Requires an `x-api-key` header. The response envelope echoes the request id verbatim.",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Result envelope", body = serde_json::Value),
        (status = 400, description = "Parse or validation error envelope", body = serde_json::Value),
        (status = 401, description = "Authentication error envelope", body = serde_json::Value),
        (status = 404, description = "Unknown method or tool envelope", body = serde_json::Value),
        (status = 429, description = "Quota exceeded envelope", body = serde_json::Value),
    )
)]
pub async fn rpc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let (status, envelope) = dispatch(&state, &headers, body).await;
    (status, Json(envelope))
}

/// Parses and dispatches one envelope, producing the HTTP status and
/// response envelope. Never returns an error: every failure becomes an
/// error envelope bound to the request's correlation id.
pub async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    body: Value,
) -> (StatusCode, ResponseEnvelope) {
    let envelope: InboundEnvelope = match serde_json::from_value(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            let err = GatewayError::ParseError(err.to_string());
            return (err.status_code(), ResponseEnvelope::error(Value::Null, &err));
        }
    };

    let id = envelope.id.clone();
    match handle(state, headers, envelope).await {
        Ok(result) => (StatusCode::OK, ResponseEnvelope::result(id, result)),
        Err(err) => (err.status_code(), ResponseEnvelope::error(id, &err)),
    }
}

async fn handle(
    state: &AppState,
    headers: &HeaderMap,
    envelope: InboundEnvelope,
) -> Result<Value, GatewayError> {
    let session = session_from_headers(state, headers).await?;

    match envelope.method.as_str() {
        "tools/list" => {
            let tools = state.tools.list().await;
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => {
            let params: ToolCallParams = serde_json::from_value(envelope.params)
                .map_err(|e| GatewayError::InvalidRequest(format!("tools/call params: {e}")))?;
            let request_id = match &envelope.id {
                Value::Null => uuid::Uuid::new_v4().to_string(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let result = state
                .invoke_tool_for_session(&session, &params.name, params.arguments, request_id)
                .await?;
            Ok(json!({ "tool": params.name, "result": result }))
        }
        other => Err(GatewayError::MethodNotFound(other.to_string())),
    }
}

/// RPC route mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/rpc", post(rpc_handler))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::test_support;

    fn headers_with_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = key.parse() {
            headers.insert("x-api-key", value);
        }
        headers
    }

    #[tokio::test]
    async fn tools_call_round_trips_with_id() {
        let (state, _session, api_key) = test_support::state_with_session().await;
        let body = json!({
            "id": "req-42",
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"text": "ping"}}
        });

        let (status, envelope) = dispatch(&state, &headers_with_key(&api_key), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope.id, json!("req-42"));
        let result = envelope.result;
        let Some(result) = result else {
            panic!("expected a result");
        };
        assert_eq!(
            result.pointer("/result/text").and_then(Value::as_str),
            Some("ping")
        );
    }

    #[tokio::test]
    async fn null_id_is_echoed() {
        let (state, _session, api_key) = test_support::state_with_session().await;
        let body = json!({ "id": null, "method": "tools/list" });
        let (status, envelope) = dispatch(&state, &headers_with_key(&api_key), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope.id, Value::Null);
    }

    #[tokio::test]
    async fn missing_key_maps_to_401() {
        let state = test_support::state().await;
        let body = json!({ "id": 1, "method": "tools/list" });
        let (status, envelope) = dispatch(&state, &HeaderMap::new(), body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            envelope.error.map(|e| e.code),
            Some("not_authenticated".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_method_maps_to_404() {
        let (state, _session, api_key) = test_support::state_with_session().await;
        let body = json!({ "id": 2, "method": "tools/frobnicate" });
        let (status, envelope) = dispatch(&state, &headers_with_key(&api_key), body).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            envelope.error.map(|e| e.code),
            Some("unknown_method".to_string())
        );
    }

    #[tokio::test]
    async fn non_envelope_body_is_parse_error() {
        let state = test_support::state().await;
        let (status, envelope) = dispatch(&state, &HeaderMap::new(), json!({"no": "method"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope.id, Value::Null);
        assert_eq!(
            envelope.error.map(|e| e.code),
            Some("invalid_message".to_string())
        );
    }
}
