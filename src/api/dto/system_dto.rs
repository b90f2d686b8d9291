//! Health and stats DTOs.

use serde::Serialize;
use utoipa::ToSchema;

use crate::service::ConnectionStats;

/// Quota policy snapshot included in health responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPolicyDto {
    /// Base quota units per daily window.
    pub base_limit: u64,
    /// Units charged per tool invocation.
    pub tool_call_cost: u64,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall service status string.
    pub status: String,
    /// Current server time, RFC 3339.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
    /// Aggregate live-connection metrics.
    pub connections: ConnectionStats,
    /// Number of registered tools.
    pub tool_count: usize,
    /// Quota policy in effect.
    pub quota: QuotaPolicyDto,
}
