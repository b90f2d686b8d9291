//! Service layer: authentication, connection tracking, tool execution.

pub mod auth_service;
pub mod connection_manager;
pub mod tool_service;

pub use auth_service::AuthService;
pub use connection_manager::{
    CLOSE_CODE_ADMIN, CLOSE_CODE_IDLE, CLOSE_CODE_SHUTDOWN, CloseCriteria, ConnectionHandle,
    ConnectionManager, ConnectionMetadata, ConnectionStats, OutboundFrame,
};
pub use tool_service::ToolService;
