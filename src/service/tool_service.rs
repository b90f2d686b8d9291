//! Tool execution pipeline: resolve, validate, invoke, instrument.
//!
//! The one execution surface shared by both transports. Every call runs
//! the same sequence: resolve the descriptor, validate input against its
//! schema (collecting every violation), invoke the handler with wall-clock
//! timing, and normalize whatever comes back into a [`GatewayError`].

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::domain::{ToolContext, ToolInfo, ToolRegistry};
use crate::error::GatewayError;

/// Execution pipeline over the shared [`ToolRegistry`].
#[derive(Debug, Clone)]
pub struct ToolService {
    registry: Arc<ToolRegistry>,
}

impl ToolService {
    /// Creates a new `ToolService`.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Returns a reference to the inner [`ToolRegistry`].
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Returns listing entries for all registered tools.
    pub async fn list(&self) -> Vec<ToolInfo> {
        self.registry.list().await
    }

    /// Executes the named tool with the given input.
    ///
    /// Wall-clock duration is measured around the handler call regardless
    /// of outcome and logged with the result.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ToolNotFound`] if no tool has that name.
    /// - [`GatewayError::ValidationFailed`] listing every schema
    ///   violation in the input.
    /// - Domain errors from the handler pass through; anything else is
    ///   wrapped into [`GatewayError::Internal`] preserving the message.
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<Value, GatewayError> {
        let descriptor = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| GatewayError::ToolNotFound(name.to_string()))?;

        descriptor.input_schema.validate_or_err(&input)?;

        let started = Instant::now();
        let outcome = descriptor.handler.call(input, ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                tracing::info!(
                    tool = name,
                    request_id = %ctx.request_id,
                    duration_ms,
                    "tool executed"
                );
                Ok(result)
            }
            Err(err) => {
                let err = remap_handler_error(err);
                tracing::warn!(
                    tool = name,
                    request_id = %ctx.request_id,
                    duration_ms,
                    error = %err,
                    "tool execution failed"
                );
                Err(err)
            }
        }
    }
}

/// Normalizes an error raised inside a tool implementation.
///
/// Recognized domain kinds pass through untouched; kinds that cannot
/// meaningfully originate from a tool (parse, dispatch, authentication)
/// are wrapped into an internal error preserving the original message.
fn remap_handler_error(err: GatewayError) -> GatewayError {
    match err {
        e @ (GatewayError::ToolNotFound(_)
        | GatewayError::ValidationFailed(_)
        | GatewayError::InvalidRequest(_)
        | GatewayError::AuthorizationFailed(_)
        | GatewayError::QuotaExceeded { .. }
        | GatewayError::RateLimited { .. }
        | GatewayError::UpstreamFailure(_)
        | GatewayError::PersistenceError(_)
        | GatewayError::Internal(_)) => e,
        other => GatewayError::Internal(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{Schema, ToolDescriptor, ToolHandler};
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, input: Value, _ctx: &ToolContext) -> Result<Value, GatewayError> {
            Ok(json!({ "echoed": input.get("text").cloned().unwrap_or(Value::Null) }))
        }
    }

    struct FailingTool(fn() -> GatewayError);

    #[async_trait]
    impl ToolHandler for FailingTool {
        async fn call(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, GatewayError> {
            Err((self.0)())
        }
    }

    fn echo_schema() -> Schema {
        serde_json::from_value(json!({
            "type": "object",
            "required": ["text"],
            "properties": { "text": { "type": "string" } }
        }))
        .unwrap_or_default()
    }

    async fn service_with_echo() -> ToolService {
        let registry = Arc::new(ToolRegistry::new());
        let result = registry
            .register(ToolDescriptor {
                name: "echo".to_string(),
                description: "echoes text back".to_string(),
                input_schema: echo_schema(),
                handler: Arc::new(EchoTool),
            })
            .await;
        assert!(result.is_ok());
        ToolService::new(registry)
    }

    #[tokio::test]
    async fn nonexistent_tool_is_tool_not_found() {
        let service = service_with_echo().await;
        let ctx = ToolContext::anonymous("req-1");
        let result = service.execute("nonexistent", json!({}), &ctx).await;
        assert!(matches!(result, Err(GatewayError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn invalid_input_names_the_missing_key() {
        let service = service_with_echo().await;
        let ctx = ToolContext::anonymous("req-2");
        let result = service.execute("echo", json!({"wrong": 1}), &ctx).await;
        let Err(GatewayError::ValidationFailed(msg)) = result else {
            panic!("expected ValidationFailed, got {result:?}");
        };
        assert!(msg.contains("text"));
    }

    #[tokio::test]
    async fn valid_input_reaches_the_handler() {
        let service = service_with_echo().await;
        let ctx = ToolContext::anonymous("req-3");
        let result = service.execute("echo", json!({"text": "hi"}), &ctx).await;
        assert!(matches!(result, Ok(v) if v == json!({"echoed": "hi"})));
    }

    #[tokio::test]
    async fn domain_errors_pass_through() {
        let registry = Arc::new(ToolRegistry::new());
        let _ = registry
            .register(ToolDescriptor {
                name: "flaky".to_string(),
                description: "always fails upstream".to_string(),
                input_schema: Schema::default(),
                handler: Arc::new(FailingTool(|| {
                    GatewayError::UpstreamFailure("analytics api down".to_string())
                })),
            })
            .await;
        let service = ToolService::new(registry);
        let ctx = ToolContext::anonymous("req-4");
        let result = service.execute("flaky", json!({}), &ctx).await;
        assert!(matches!(result, Err(GatewayError::UpstreamFailure(_))));
    }

    #[tokio::test]
    async fn unrecognized_kinds_wrap_to_internal() {
        let registry = Arc::new(ToolRegistry::new());
        let _ = registry
            .register(ToolDescriptor {
                name: "weird".to_string(),
                description: "raises a transport-level kind".to_string(),
                input_schema: Schema::default(),
                handler: Arc::new(FailingTool(|| {
                    GatewayError::MethodNotFound("tools/frobnicate".to_string())
                })),
            })
            .await;
        let service = ToolService::new(registry);
        let ctx = ToolContext::anonymous("req-5");
        let result = service.execute("weird", json!({}), &ctx).await;
        let Err(GatewayError::Internal(msg)) = result else {
            panic!("expected Internal, got {result:?}");
        };
        assert!(msg.contains("tools/frobnicate"));
    }
}
