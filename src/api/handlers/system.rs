//! System endpoints: health check and connection stats.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{HealthResponse, QuotaPolicyDto};
use crate::app_state::AppState;

/// `GET /health` — Aggregate service status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service status, connection aggregates, tool count and the quota policy in effect.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.connections.stats().await;
    let tool_count = state.tools.registry().count().await;

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            connections,
            tool_count,
            quota: QuotaPolicyDto {
                base_limit: state.config.base_quota_limit,
                tool_call_cost: state.config.tool_call_cost,
            },
        }),
    )
}

/// `GET /api/v1/stats` — Live-connection metrics.
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "System",
    summary = "Connection statistics",
    description = "Returns total and active connection counts, mean connection age, byte aggregates and the derived error rate.",
    responses(
        (status = 200, description = "Aggregate connection metrics", body = crate::service::ConnectionStats),
    )
)]
pub async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.connections.stats().await))
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use crate::test_support;

    #[tokio::test]
    async fn health_aggregates_reflect_registry() {
        let state = test_support::state().await;
        let tool_count = state.tools.registry().count().await;
        assert_eq!(tool_count, 2);
        let stats = state.connections.stats().await;
        assert_eq!(stats.total_connections, 0);
    }
}
