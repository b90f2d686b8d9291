//! Tool listing and invocation DTOs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::domain::ToolInfo;

/// One tool in a listing response.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfoDto {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON input schema.
    #[schema(value_type = Object)]
    pub input_schema: Value,
}

impl From<ToolInfo> for ToolInfoDto {
    fn from(info: ToolInfo) -> Self {
        Self {
            name: info.name,
            description: info.description,
            input_schema: serde_json::to_value(&info.input_schema).unwrap_or_default(),
        }
    }
}

/// Response of `GET /api/v1/tools`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ToolListResponse {
    /// Registered tools, sorted by name.
    pub tools: Vec<ToolInfoDto>,
    /// Number of registered tools.
    pub count: usize,
}

/// Request body of `POST /api/v1/tools/{name}`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InvokeToolRequest {
    /// Tool input, validated against the descriptor schema.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub arguments: Value,
}

/// Response of `POST /api/v1/tools/{name}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvokeToolResponse {
    /// Tool that was invoked.
    pub tool: String,
    /// Tool output payload.
    #[schema(value_type = Object)]
    pub result: Value,
    /// Server-assigned request id.
    pub request_id: String,
}
