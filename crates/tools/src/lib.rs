//! Tool servers for Autopilot.
//!
//! Every tool the agent can call comes from an external MCP server speaking
//! JSON-RPC over stdio. The [`ToolGateway`] launches the configured servers,
//! lists their tools and merges them into one [`ToolSet`] namespace, tracking
//! each opened connection so the caller can close it when the task ends.
//!
//! [`ToolSet`]: autopilot_core::ToolSet

pub mod gateway;
pub mod mcp;

pub use gateway::{McpServerSpec, ServerLauncher, StdioLauncher, ToolGateway, ToolServer};
pub use mcp::{McpClient, McpTool, McpToolInfo};
