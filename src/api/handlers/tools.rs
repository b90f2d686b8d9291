//! Stateless tool endpoints: list and invoke-by-name.
//!
//! Shares the tool registry and quota ledger with the duplex transport.
//! Callers authenticate per request with an `x-api-key` header; there is
//! no connection to bind a session to.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{InvokeToolRequest, InvokeToolResponse, ToolListResponse};
use crate::app_state::AppState;
use crate::domain::Session;
use crate::error::{ErrorResponse, GatewayError};

/// Resolves the `x-api-key` header into a session.
///
/// # Errors
///
/// Returns [`GatewayError::AuthenticationFailed`] for a missing header
/// or a key that does not validate (fail closed).
pub async fn session_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Session, GatewayError> {
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            GatewayError::AuthenticationFailed("Authentication required".to_string())
        })?;
    state
        .auth
        .validate_api_key(key)
        .await
        .ok_or_else(|| GatewayError::AuthenticationFailed("Invalid API key".to_string()))
}

async fn list_tools_inner(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<ToolListResponse, GatewayError> {
    let _session = session_from_headers(state, headers).await?;
    let tools: Vec<_> = state.tools.list().await.into_iter().map(Into::into).collect();
    let count = tools.len();
    Ok(ToolListResponse { tools, count })
}

async fn invoke_tool_inner(
    state: &AppState,
    headers: &HeaderMap,
    name: &str,
    request: InvokeToolRequest,
) -> Result<InvokeToolResponse, GatewayError> {
    let session = session_from_headers(state, headers).await?;
    let request_id = uuid::Uuid::new_v4().to_string();
    let result = state
        .invoke_tool_for_session(&session, name, request.arguments, request_id.clone())
        .await?;
    Ok(InvokeToolResponse {
        tool: name.to_string(),
        result,
        request_id,
    })
}

/// `GET /tools` — List registered tools.
///
/// # Errors
///
/// Returns [`GatewayError::AuthenticationFailed`] without a valid
/// `x-api-key` header.
#[utoipa::path(
    get,
    path = "/api/v1/tools",
    tag = "Tools",
    summary = "List tools",
    description = "Returns every registered tool with its input schema. Requires an `x-api-key` header.",
    responses(
        (status = 200, description = "Registered tools", body = ToolListResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
    )
)]
pub async fn list_tools(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    let response = list_tools_inner(&state, &headers).await?;
    Ok((StatusCode::OK, Json(response)))
}

/// `POST /tools/{name}` — Invoke a tool by name.
///
/// # Errors
///
/// Returns [`GatewayError`] for authentication, authorization, quota,
/// validation or execution failures.
#[utoipa::path(
    post,
    path = "/api/v1/tools/{name}",
    tag = "Tools",
    summary = "Invoke a tool",
    description = "Validates the arguments against the tool's schema, executes it, and charges one quota unit. Requires an `x-api-key` header.",
    params(
        ("name" = String, Path, description = "Registered tool name"),
    ),
    request_body = InvokeToolRequest,
    responses(
        (status = 200, description = "Tool executed", body = InvokeToolResponse),
        (status = 400, description = "Arguments failed schema validation", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 403, description = "Tool not allowed for this session", body = ErrorResponse),
        (status = 404, description = "Tool not found", body = ErrorResponse),
        (status = 429, description = "Quota exceeded", body = ErrorResponse),
    )
)]
pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<InvokeToolRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let response = invoke_tool_inner(&state, &headers, &name, request).await?;
    Ok((StatusCode::OK, Json(response)))
}

/// Tool routes mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(invoke_tool))
}
