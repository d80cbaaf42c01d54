use async_trait::async_trait;
use autopilot_core::display::display_tool_output;
use autopilot_core::error::ToolError;
use autopilot_core::tool::{Tool, ToolResult};
use serde_json::Value;

use super::client::{McpClient, McpToolInfo};

/// A tool exposed by an MCP server, callable through the shared client.
pub struct McpTool {
    client: McpClient,
    info: McpToolInfo,
}

impl McpTool {
    pub fn new(client: McpClient, info: McpToolInfo) -> Self {
        Self { client, info }
    }

    /// Name of the server that owns this tool.
    pub fn server(&self) -> &str {
        self.client.server()
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let result = self.client.call_tool(&self.info.name, arguments).await?;
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(ToolResult {
            success: !is_error,
            output: display_tool_output(&result),
            data: Some(result),
        })
    }
}

impl std::fmt::Debug for McpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTool")
            .field("server", &self.server())
            .field("name", &self.info.name)
            .finish()
    }
}
