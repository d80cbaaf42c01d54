//! Language model trait: the abstraction over a streaming, tool-calling model.
//!
//! One [`LanguageModel::stream`] call runs a bounded multi-step conversation:
//! the model may call tools (which the invoker executes against the
//! [`ToolSet`]) and the whole exchange is reported as a finite sequence of
//! [`StepEvent`]s. The sequence cannot be resumed; continuing means calling
//! `stream` again.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::tool::ToolSet;

/// Which provider and model a task should run against.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSpec")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// How the model is allowed to pick tools on its first step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides freely
    Auto,
    /// The model must call some tool
    Required,
    /// The model must call this specific tool
    Tool { name: String },
}

impl ToolChoice {
    /// Pick the first-step tool choice.
    ///
    /// With tools available: force the start tool when there is one; otherwise
    /// require a tool call, unless the provider rejects `required`, in which
    /// case fall back to `Auto`. Without tools: `Auto`.
    pub fn select(has_tools: bool, start_tool: Option<&str>, rejects_required: bool) -> Self {
        if !has_tools {
            return Self::Auto;
        }
        match start_tool {
            Some(name) => Self::Tool {
                name: name.to_string(),
            },
            None if rejects_required => Self::Auto,
            None => Self::Required,
        }
    }
}

/// Everything the invoker needs for one streamed run.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub system_prompt: String,
    pub prompt: String,
    /// Applies to the first step only; later steps are `Auto`
    pub tool_choice: ToolChoice,
    pub max_steps: u32,
    pub max_tokens: Option<u32>,
}

/// Raw finish reason reported by the model for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other(String),
}

impl FinishReason {
    /// Parse an OpenAI-style `finish_reason` string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "eos" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "tool-calls" | "function_call" | "tool_use" => Self::ToolCalls,
            "content_filter" | "content-filter" => Self::ContentFilter,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Finish reason normalized to what the completion logic reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolUse,
    EndTurn,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolUse => "tool_use",
            Self::EndTurn => "end_turn",
        }
    }
}

impl From<&FinishReason> for StopReason {
    fn from(reason: &FinishReason) -> Self {
        match reason {
            FinishReason::Stop => Self::Stop,
            FinishReason::ToolCalls => Self::ToolUse,
            _ => Self::EndTurn,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event of a streamed model run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepEvent {
    /// Partial assistant text
    TextDelta { text: String },

    /// Partial reasoning text
    ReasoningDelta { text: String },

    /// The model called a tool
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },

    /// A tool call finished executing
    ToolResult {
        id: String,
        name: String,
        args: serde_json::Value,
        result: serde_json::Value,
    },

    /// A model step ended
    StepFinish { reason: FinishReason },

    /// The whole run ended
    Finish { reason: FinishReason },
}

impl StepEvent {
    /// Short event name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::StepFinish { .. } => "step-finish",
            Self::Finish { .. } => "finish",
        }
    }
}

/// A lazy, finite, non-restartable sequence of step events.
pub type StepStream = Pin<Box<dyn Stream<Item = Result<StepEvent, ProviderError>> + Send>>;

/// The core LanguageModel trait.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name (e.g. "groq", "ollama").
    fn provider(&self) -> &str;

    /// Model id as sent to the provider.
    fn model_id(&self) -> &str;

    /// Whether the provider refuses a strict "must call a tool" instruction.
    fn rejects_required_tool_choice(&self) -> bool {
        false
    }

    /// Start a streamed run.
    ///
    /// Once `cancel` fires the stream must stop yielding events and end promptly.
    async fn stream(
        &self,
        request: StreamRequest,
        tools: Arc<ToolSet>,
        cancel: CancellationToken,
    ) -> Result<StepStream, ProviderError>;
}

/// Resolves a model handle for a [`ModelSpec`]; `None` means unsupported.
pub trait ModelFactory: Send + Sync {
    fn create_model(&self, spec: &ModelSpec) -> Option<Arc<dyn LanguageModel>>;
}
