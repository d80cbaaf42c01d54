//! Configuration loading, validation, and management for Autopilot.
//!
//! Loads configuration from `~/.autopilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.autopilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Direct-chat fast path settings
    #[serde(default)]
    pub direct_chat: DirectChatSettings,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// MCP tool servers started for every task
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

fn default_provider() -> String {
    "ollama".into()
}
fn default_model() -> String {
    "llama3.2".into()
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("agent", &self.agent)
            .field("direct_chat", &self.direct_chat)
            .field("providers", &self.providers)
            .field("mcp_servers", &self.mcp_servers)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Agent loop settings (`[agent]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Replaces the built-in task system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Maximum model steps per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Minimum interval between streamed message updates
    #[serde(default = "default_stream_throttle_ms")]
    pub stream_throttle_ms: u64,

    /// How many continuation prompts a task may receive
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,

    /// Call the search tool directly for obvious search prompts
    #[serde(default = "default_true")]
    pub direct_bypass: bool,
}

fn default_max_steps() -> u32 {
    20
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_stream_throttle_ms() -> u64 {
    80
}
fn default_max_continuations() -> u32 {
    1
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_steps: default_max_steps(),
            max_tokens: default_max_tokens(),
            stream_throttle_ms: default_stream_throttle_ms(),
            max_continuations: default_max_continuations(),
            direct_bypass: true,
        }
    }
}

/// Direct-chat settings (`[direct_chat]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectChatSettings {
    /// Total attempts, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles after every rate-limited attempt
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_direct_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_retry_delay_ms() -> u64 {
    1000
}
fn default_direct_max_tokens() -> u32 {
    256
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for DirectChatSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_tokens: default_direct_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// One MCP tool server (`[[mcp_servers]]`).
#[derive(Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,

    /// Program followed by its arguments
    #[serde(default)]
    pub command: Vec<String>,

    /// Extra environment on top of the inherited one
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl std::fmt::Debug for McpServerConfig {
    // Env values routinely carry tokens.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_keys: Vec<&String> = self.env.keys().collect();
        f.debug_struct("McpServerConfig")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("env", &env_keys)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.autopilot/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `AUTOPILOT_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    /// - `GROQ_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = [
                "AUTOPILOT_API_KEY",
                "OPENROUTER_API_KEY",
                "OPENAI_API_KEY",
                "GROQ_API_KEY",
            ]
            .iter()
            .find_map(|key| lookup(key).filter(|v| !v.is_empty()));
        }

        if let Some(provider) = lookup("AUTOPILOT_PROVIDER").filter(|v| !v.is_empty()) {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("AUTOPILOT_MODEL").filter(|v| !v.is_empty()) {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".autopilot")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.stream_throttle_ms > 10_000 {
            return Err(ConfigError::ValidationError(
                "agent.stream_throttle_ms must be at most 10000".into(),
            ));
        }

        if self.direct_chat.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "direct_chat.max_retries must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for server in &self.mcp_servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "every mcp_servers entry needs a name".into(),
                ));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate mcp server name '{}'",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Provider settings for `provider`, if configured.
    pub fn provider(&self, provider: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider)
    }

    /// API key for `provider`: the provider table first, then the global key.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.provider(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Base URL override for `provider`.
    pub fn api_url_for(&self, provider: &str) -> Option<String> {
        self.provider(provider).and_then(|p| p.api_url.clone())
    }

    /// Enabled MCP servers, in file order.
    pub fn enabled_mcp_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.mcp_servers.iter().filter(|s| s.enabled)
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            agent: AgentSettings::default(),
            direct_chat: DirectChatSettings::default(),
            providers: HashMap::new(),
            mcp_servers: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
