//! Error types for the Autopilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all Autopilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Agent loop errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the agent loop itself.
///
/// Every variant except `Disposed` is surfaced to the caller as an `error`
/// event followed by one terminal `complete(status: error)`.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("Adapter has been disposed and cannot start new tasks")]
    Disposed,

    #[error(
        "Unsupported provider: {provider}. Supported: openai, anthropic, google, groq, deepseek, ollama, openrouter, lmstudio, etc."
    )]
    UnsupportedProvider { provider: String },

    #[error("Failed to connect to tool server {server}: {reason}")]
    ToolConnection { server: String, reason: String },

    #[error("Model stream failed: {0}")]
    Stream(String),

    #[error("Pre-start hook failed: {0}")]
    Hook(String),

    #[error("Agent configuration failed: {0}")]
    Config(String),

    #[error("Task was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool server {server} failed to start: {reason}")]
    ConnectionFailed { server: String, reason: String },

    #[error("Tool server {server} protocol error: {reason}")]
    Protocol { server: String, reason: String },

    #[error("Failed to close tool server {server}: {reason}")]
    CloseFailed { server: String, reason: String },
}

impl ToolError {
    /// Name of the tool server involved, for connection-level failures.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailed { server, .. }
            | Self::Protocol { server, .. }
            | Self::CloseFailed { server, .. } => Some(server),
            _ => None,
        }
    }
}

impl From<ToolError> for AgentError {
    fn from(err: ToolError) -> Self {
        let server = err.server().unwrap_or("unknown").to_string();
        AgentError::ToolConnection {
            server,
            reason: err.to_string(),
        }
    }
}

impl From<ProviderError> for AgentError {
    fn from(err: ProviderError) -> Self {
        AgentError::Stream(err.to_string())
    }
}
