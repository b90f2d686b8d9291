//! Domain layer: sessions, envelopes, schemas, tool registry, events.
//!
//! This module contains the server-side domain model: session identity
//! and quota types, the transport-shared request/response envelope, the
//! typed input-schema evaluator, the tool registry, and the event bus
//! for broadcasting push events.

pub mod envelope;
pub mod event_bus;
pub mod schema;
pub mod session;
pub mod tool_registry;

pub use envelope::{InboundEnvelope, Notification, ResponseEnvelope};
pub use event_bus::{EventBus, GatewayEvent};
pub use schema::{Schema, SchemaType, Violation, ViolationCode};
pub use session::{Permissions, QuotaLedger, Session, SessionId, SessionSummary};
pub use tool_registry::{ToolContext, ToolDescriptor, ToolHandler, ToolInfo, ToolRegistry};
