//! Concurrent tool storage keyed by name.
//!
//! [`ToolRegistry`] owns the name → descriptor map shared by both
//! transports. Descriptors are validated at registration time;
//! re-registration under an existing name replaces the previous entry
//! (last write wins, logged) rather than being rejected.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::schema::Schema;
use super::session::{Permissions, Session, SessionId};
use crate::error::GatewayError;

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Correlation id of the originating request.
    pub request_id: String,
    /// Session the call was made under, if authenticated.
    pub session_id: Option<SessionId>,
    /// User owning the quota ledger, if authenticated.
    pub user_id: Option<String>,
    /// Caller's permission set.
    pub permissions: Permissions,
}

impl ToolContext {
    /// Context for a call with no authenticated identity (tests, internal).
    #[must_use]
    pub fn anonymous(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: None,
            user_id: None,
            permissions: Permissions::default(),
        }
    }

    /// Context for a call made under the given session.
    #[must_use]
    pub fn for_session(request_id: impl Into<String>, session: &Session) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: Some(session.id),
            user_id: Some(session.user_id.clone()),
            permissions: session.permissions.clone(),
        }
    }
}

/// Contract implemented by every tool.
///
/// The registry never inspects what an implementation does internally;
/// it only validates input against the descriptor schema beforehand and
/// normalizes errors afterwards.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Executes the tool with schema-validated input.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] for any recognized domain failure;
    /// unrecognized kinds are remapped to internal errors by the
    /// execution pipeline.
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, GatewayError>;
}

/// A named, schema-validated operation.
pub struct ToolDescriptor {
    /// Unique tool name (identifier pattern).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Schema every input is validated against before invocation.
    pub input_schema: Schema,
    /// The tool implementation.
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Client-visible tool listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Input schema.
    pub input_schema: Schema,
}

/// Central store for registered tools.
///
/// Uses a `RwLock<HashMap<...>>` with `Arc`'d descriptors so lookups
/// hand out cheap clones and execution never holds the map lock.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolDescriptor>>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool descriptor.
    ///
    /// The descriptor itself is validated: the name must match the
    /// identifier pattern (leading ASCII letter, then letters, digits,
    /// `_` or `-`) and the description must be non-empty. Registering
    /// over an existing name replaces it and logs a warning.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for a malformed
    /// descriptor; the registry is left unchanged.
    pub async fn register(&self, descriptor: ToolDescriptor) -> Result<(), GatewayError> {
        if !is_valid_tool_name(&descriptor.name) {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid tool name: {:?}",
                descriptor.name
            )));
        }
        if descriptor.description.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(format!(
                "tool {} has no description",
                descriptor.name
            )));
        }

        let mut map = self.tools.write().await;
        let name = descriptor.name.clone();
        if map.insert(name.clone(), Arc::new(descriptor)).is_some() {
            tracing::warn!(tool = %name, "re-registered existing tool, previous handler replaced");
        } else {
            tracing::info!(tool = %name, "tool registered");
        }
        Ok(())
    }

    /// Removes a tool, returning `true` if it was present.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.tools.write().await.remove(name).is_some();
        if removed {
            tracing::info!(tool = name, "tool unregistered");
        }
        removed
    }

    /// Returns `true` if a tool with the given name is registered.
    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Returns the descriptor for `name`, if registered.
    pub async fn get(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Returns listing entries for all registered tools, sorted by name.
    pub async fn list(&self) -> Vec<ToolInfo> {
        let map = self.tools.read().await;
        let mut infos: Vec<ToolInfo> = map
            .values()
            .map(|d| ToolInfo {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.input_schema.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Returns the number of registered tools.
    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }
}

/// Identifier pattern for tool names: leading ASCII letter, then ASCII
/// letters, digits, `_` or `-`.
#[must_use]
pub fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticTool(Value);

    #[async_trait]
    impl ToolHandler for StaticTool {
        async fn call(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, GatewayError> {
            Ok(self.0.clone())
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: "test tool".to_string(),
            input_schema: Schema::default(),
            handler: Arc::new(StaticTool(json!({"ok": true}))),
        }
    }

    #[tokio::test]
    async fn register_then_list_contains_exactly_one() {
        let registry = ToolRegistry::new();
        let result = registry.register(descriptor("echo")).await;
        assert!(result.is_ok());

        let list = registry.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list.first().map(|t| t.name.as_str()), Some("echo"));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn malformed_descriptor_leaves_registry_unchanged() {
        let registry = ToolRegistry::new();
        for bad_name in ["", "1tool", "has space", "has/slash", "-leading"] {
            let result = registry.register(descriptor(bad_name)).await;
            assert!(result.is_err(), "name {bad_name:?} should be rejected");
        }
        let empty_desc = ToolDescriptor {
            description: "   ".to_string(),
            ..descriptor("fine_name")
        };
        assert!(registry.register(empty_desc).await.is_err());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn reregistration_replaces_last_write_wins() {
        let registry = ToolRegistry::new();
        let first = ToolDescriptor {
            description: "first".to_string(),
            ..descriptor("echo")
        };
        let second = ToolDescriptor {
            description: "second".to_string(),
            ..descriptor("echo")
        };
        assert!(registry.register(first).await.is_ok());
        assert!(registry.register(second).await.is_ok());
        assert_eq!(registry.count().await, 1);
        let current = registry.get("echo").await;
        let Some(current) = current else {
            panic!("tool should exist");
        };
        assert_eq!(current.description, "second");
    }

    #[tokio::test]
    async fn unregister_and_has() {
        let registry = ToolRegistry::new();
        let _ = registry.register(descriptor("echo")).await;
        assert!(registry.has("echo").await);
        assert!(registry.unregister("echo").await);
        assert!(!registry.has("echo").await);
        assert!(!registry.unregister("echo").await);
        assert_eq!(registry.count().await, 0);
    }

    #[test]
    fn name_pattern_accepts_identifiers() {
        for good in ["echo", "current_time", "get-stats", "a1"] {
            assert!(is_valid_tool_name(good), "{good} should be valid");
        }
    }
}
