//! Tool gateway: launches tool servers and merges their tools.
//!
//! `connect` walks the server list in order. The first server to expose a
//! tool name keeps the bare name; later servers get `server_tool`. Servers
//! with an empty command are skipped. Any launch or listing failure aborts
//! the whole call, but every connection opened up to that point has already
//! been pushed into the caller's [`ConnectionSet`], so nothing is leaked.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use autopilot_config::McpServerConfig;
use autopilot_core::error::ToolError;
use autopilot_core::tool::{Closeable, ConnectionSet, Tool, ToolSet};
use tracing::{debug, info};

use crate::mcp::{McpClient, McpTool};

/// How to launch one tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpServerSpec {
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: HashMap<String, String>,
}

impl McpServerSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl From<&McpServerConfig> for McpServerSpec {
    fn from(config: &McpServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            env: config.env.clone(),
        }
    }
}

/// A connected server that can enumerate its tools.
#[async_trait]
pub trait ToolServer: Closeable {
    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError>;
}

/// Starts tool servers.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(&self, spec: &McpServerSpec) -> Result<Arc<dyn ToolServer>, ToolError>;
}

/// Launches servers as child processes speaking MCP over stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioLauncher;

#[async_trait]
impl ServerLauncher for StdioLauncher {
    async fn launch(&self, spec: &McpServerSpec) -> Result<Arc<dyn ToolServer>, ToolError> {
        Ok(Arc::new(McpClient::spawn(spec).await?))
    }
}

#[async_trait]
impl ToolServer for McpClient {
    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        let listed = self.list_tools().await?;
        Ok(listed
            .into_iter()
            .map(|info| Arc::new(McpTool::new(self.clone(), info)) as Arc<dyn Tool>)
            .collect())
    }
}

/// Connects a list of tool servers into one tool namespace.
#[derive(Clone)]
pub struct ToolGateway {
    launcher: Arc<dyn ServerLauncher>,
}

impl ToolGateway {
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(StdioLauncher))
    }

    pub fn with_launcher(launcher: Arc<dyn ServerLauncher>) -> Self {
        Self { launcher }
    }

    /// Launch every server in `specs` and merge their tools.
    ///
    /// Opened connections are pushed into `connections` as soon as they exist;
    /// closing them is the caller's job whether this returns `Ok` or `Err`.
    pub async fn connect(
        &self,
        specs: &[McpServerSpec],
        connections: &mut ConnectionSet,
    ) -> Result<ToolSet, ToolError> {
        let mut tools = ToolSet::new();

        for spec in specs {
            if spec.command.is_empty() {
                debug!(server = %spec.name, "Skipping tool server with empty command");
                continue;
            }

            let server = self.launcher.launch(spec).await?;
            connections.push(server.clone());

            let listed = server.tools().await.map_err(|e| ToolError::ConnectionFailed {
                server: spec.name.clone(),
                reason: format!("listing tools failed: {e}"),
            })?;

            let count = listed.len();
            for tool in listed {
                tools.insert_from(&spec.name, tool);
            }
            info!(server = %spec.name, tools = count, "Connected tool server");
        }

        Ok(tools)
    }
}

impl Default for ToolGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGateway").finish_non_exhaustive()
    }
}
