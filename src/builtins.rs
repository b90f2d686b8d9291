//! Built-in tools registered at startup.
//!
//! Real deployments register their own [`ToolHandler`] implementations;
//! these two exist so a fresh gateway is exercisable end to end over
//! both transports.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::domain::{Schema, ToolContext, ToolDescriptor, ToolHandler, ToolRegistry};
use crate::error::GatewayError;

/// Echoes the `text` input back, optionally repeated.
#[derive(Debug)]
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, input: Value, _ctx: &ToolContext) -> Result<Value, GatewayError> {
        let text = input
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let repeat = input.get("repeat").and_then(Value::as_u64).unwrap_or(1);
        let echoed = std::iter::repeat_n(text, repeat as usize)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(json!({ "text": echoed }))
    }
}

/// Returns the current server time.
#[derive(Debug)]
pub struct CurrentTimeTool;

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    async fn call(&self, _input: Value, ctx: &ToolContext) -> Result<Value, GatewayError> {
        Ok(json!({
            "iso": Utc::now().to_rfc3339(),
            "epochMillis": Utc::now().timestamp_millis(),
            "requestId": ctx.request_id,
        }))
    }
}

fn schema(raw: Value) -> Schema {
    serde_json::from_value(raw).unwrap_or_default()
}

/// Registers the built-in tools.
///
/// # Errors
///
/// Propagates registry validation failures, which would indicate a
/// programming error in the descriptors below.
pub async fn register_builtin_tools(registry: &ToolRegistry) -> Result<(), GatewayError> {
    registry
        .register(ToolDescriptor {
            name: "echo".to_string(),
            description: "Echoes the given text back to the caller".to_string(),
            input_schema: schema(json!({
                "type": "object",
                "required": ["text"],
                "properties": {
                    "text": { "type": "string", "minLength": 1, "maxLength": 10_000 },
                    "repeat": { "type": "integer", "minimum": 1, "maximum": 10 }
                }
            })),
            handler: Arc::new(EchoTool),
        })
        .await?;

    registry
        .register(ToolDescriptor {
            name: "current_time".to_string(),
            description: "Returns the current server time".to_string(),
            input_schema: schema(json!({ "type": "object" })),
            handler: Arc::new(CurrentTimeTool),
        })
        .await?;

    Ok(())
}
