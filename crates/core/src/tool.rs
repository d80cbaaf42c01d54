//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools come from external tool servers; the gateway merges every server's
//! tools into one [`ToolSet`] namespace and hands back a [`ConnectionSet`]
//! the agent loop must close when the task ends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ToolError;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name, as exposed in the merged namespace
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Text output fed back to the model
    pub output: String,

    /// Raw structured result as returned by the tool server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    /// The payload reported to the caller: the raw result when present, else the text.
    pub fn payload(&self) -> serde_json::Value {
        self.data
            .clone()
            .unwrap_or_else(|| serde_json::Value::String(self.output.clone()))
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's own name (as its server knows it).
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;
}

/// The combined, callable tool namespace for one task.
///
/// Keeps insertion order so "first tool matching X" lookups are stable.
#[derive(Clone, Default)]
pub struct ToolSet {
    entries: Vec<(String, Arc<dyn Tool>)>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool coming from `provider`.
    ///
    /// The first provider to register a name keeps the bare name; later ones
    /// are keyed `provider_name`. Returns the key used.
    pub fn insert_from(&mut self, provider: &str, tool: Arc<dyn Tool>) -> String {
        let bare = tool.name().to_string();
        let key = if self.contains(&bare) {
            let prefixed = format!("{provider}_{bare}");
            debug!(provider, tool = %bare, key = %prefixed, "Tool name collision, prefixing");
            prefixed
        } else {
            bare
        };
        self.insert_as(key.clone(), tool);
        key
    }

    fn insert_as(&mut self, key: String, tool: Arc<dyn Tool>) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = tool,
            None => self.entries.push((key, tool)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, t)| Arc::clone(t))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// Tool keys in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tool definitions keyed by their namespace key (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries
            .iter()
            .map(|(key, tool)| ToolDefinition {
                name: key.clone(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// Execute the tool registered under `name`.
    pub async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments).await
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("tools", &self.names()).finish()
    }
}

/// A live connection to a tool server.
///
/// `close` must tolerate being called more than once and after the server
/// has already exited.
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Name of the server behind this connection.
    fn name(&self) -> &str;

    async fn close(&self) -> Result<(), ToolError>;
}

/// The connections opened for one task.
#[derive(Default)]
pub struct ConnectionSet {
    connections: Vec<Arc<dyn Closeable>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, connection: Arc<dyn Closeable>) {
        self.connections.push(connection);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every connection and empty the set.
    ///
    /// Never fails: each close failure is logged and returned so the caller
    /// can inspect it, but it never replaces the task's own outcome. Calling
    /// this on an empty set is a no-op.
    ///
    /// The set is emptied up front and every close starts on the first poll,
    /// so dropping the returned future never skips a connection.
    pub async fn close_all(&mut self) -> Vec<ToolError> {
        let connections = std::mem::take(&mut self.connections);
        let closes = connections.iter().map(|connection| async move {
            connection.close().await.map_err(|e| {
                warn!(server = %connection.name(), error = %e, "Error closing tool server");
                e
            })
        });
        futures::future::join_all(closes)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }
}

impl std::fmt::Debug for ConnectionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.connections.iter().map(|c| c.name()).collect();
        f.debug_struct("ConnectionSet")
            .field("connections", &names)
            .finish()
    }
}
