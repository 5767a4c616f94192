//! MCP transport: JSON-RPC protocol types and the session-scoped context
//! server the daemon mounts at `/mcp`.

pub mod protocol;
pub mod server;

pub use server::{agent_from_session_id, new_session_id, McpSession};
