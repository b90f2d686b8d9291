//! WebSocket transport: connection lifecycle, dispatch, event fan-out.
//!
//! The duplex endpoint at `/ws` carries the full message catalogue:
//! `authenticate`, `ping`/`pong`, `tools/list`, `tools/call`,
//! `subscribe`/`unsubscribe`, plus server-initiated `handshake` and
//! `event` notifications.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod messages;
