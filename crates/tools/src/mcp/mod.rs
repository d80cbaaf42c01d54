//! Model Context Protocol client and tool adapter.

pub(crate) mod client;
mod tool;

pub use client::{McpClient, McpToolInfo};
pub use tool::McpTool;
