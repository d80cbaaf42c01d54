//! Agent configuration resolved per task.

use async_trait::async_trait;
use autopilot_config::AppConfig;
use autopilot_core::error::AgentError;
use autopilot_core::provider::ModelSpec;
use autopilot_tools::McpServerSpec;

use crate::hooks::TaskContext;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Autopilot, an autonomous assistant that completes tasks using the tools available to you.

For anything that takes more than one step, first call start_task with needs_planning set to true, a goal and the list of steps. Keep the plan current with todowrite as you go. Work through the steps with the other tools. When every step is done, call complete_task with a short summary.

For a simple question you can answer directly, call start_task with needs_planning set to false and then answer.";

/// Appended to the system prompt when a task is continued after stopping early.
pub const CONTINUATION_NOTE: &str = "You are resuming a task you already planned. Do not call start_task again. Finish the remaining steps, keep todowrite current and call complete_task when done.";

/// Context setting: comma-separated names of the only MCP servers to connect.
pub const SETTING_MCP_SERVERS: &str = "mcp_servers";

/// Context setting: system prompt replacing the configured one.
pub const SETTING_SYSTEM_PROMPT: &str = "system_prompt";

/// What one task runs with.
#[derive(Clone, PartialEq)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub mcp_servers: Vec<McpServerSpec>,
    pub provider: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl AgentConfig {
    pub fn model_spec(&self) -> ModelSpec {
        ModelSpec {
            provider: self.provider.clone(),
            model_id: self.model_id.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let servers: Vec<&str> = self.mcp_servers.iter().map(|s| s.name.as_str()).collect();
        f.debug_struct("AgentConfig")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("mcp_servers", &servers)
            .finish_non_exhaustive()
    }
}

/// Resolves the [`AgentConfig`] for a task, after the pre-start hook ran.
#[async_trait]
pub trait AgentConfigResolver: Send + Sync {
    async fn resolve(&self, ctx: &TaskContext) -> Result<AgentConfig, AgentError>;
}

/// Resolves from the loaded [`AppConfig`].
///
/// Uses the default provider, the caller's model (else the provider's or
/// global default model) and only enabled MCP servers with a command.
/// Hook-set context values narrow the servers ([`SETTING_MCP_SERVERS`]) and
/// replace the system prompt ([`SETTING_SYSTEM_PROMPT`]); a continuation
/// gets [`CONTINUATION_NOTE`] appended to its prompt.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config: AppConfig,
}

impl ConfigResolver {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, ctx: &TaskContext) -> AgentConfig {
        let config = &self.config;
        let provider = config.default_provider.clone();
        let model_id = ctx
            .model_id
            .clone()
            .or_else(|| config.provider(&provider).and_then(|p| p.default_model.clone()))
            .unwrap_or_else(|| config.default_model.clone());

        let allowed: Option<Vec<&str>> = ctx.setting(SETTING_MCP_SERVERS).map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect()
        });
        let mcp_servers = config
            .enabled_mcp_servers()
            .filter(|server| !server.command.is_empty())
            .filter(|server| {
                allowed
                    .as_ref()
                    .is_none_or(|names| names.contains(&server.name.as_str()))
            })
            .map(McpServerSpec::from)
            .collect();

        let mut system_prompt = ctx
            .setting(SETTING_SYSTEM_PROMPT)
            .map(str::to_string)
            .or_else(|| config.agent.system_prompt.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        if ctx.continuation {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(CONTINUATION_NOTE);
        }

        AgentConfig {
            system_prompt,
            mcp_servers,
            api_key: config.api_key_for(&provider),
            base_url: config.api_url_for(&provider),
            provider,
            model_id,
        }
    }
}

#[async_trait]
impl AgentConfigResolver for ConfigResolver {
    async fn resolve(&self, ctx: &TaskContext) -> Result<AgentConfig, AgentError> {
        Ok(self.build(ctx))
    }
}
