//! Direct chat: one non-streaming completion for simple prompts.
//!
//! Skips tools and the agent loop entirely. Rate-limited attempts are
//! retried with exponential backoff; every other failure ends the call.

use std::time::Duration;

use autopilot_config::DirectChatSettings;
use autopilot_core::display::sanitize_for_display;
use autopilot_core::message::TaskMessage;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Respond briefly and naturally. \
For greetings or simple questions, give a short, friendly reply in 1-2 sentences. \
Never output JSON, schemas, or code examples.";

/// Session ids of direct chats carry this prefix so a follow-up prompt can
/// continue the conversation on the fast path.
pub const DIRECT_SESSION_PREFIX: &str = "direct-";

pub fn is_direct_chat_session(session_id: &str) -> bool {
    session_id.starts_with(DIRECT_SESSION_PREFIX)
}

pub fn new_direct_session_id() -> String {
    format!("{DIRECT_SESSION_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Attempts and backoff for rate-limited requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): doubles every time.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

/// Where and how a direct chat request is sent.
#[derive(Clone)]
pub struct DirectChatConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// For logging
    pub provider_id: String,
    pub retry: RetryPolicy,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl DirectChatConfig {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            provider_id: provider_id.into(),
            retry: RetryPolicy::default(),
            max_tokens: 256,
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Apply the `[direct_chat]` config table.
    pub fn with_settings(mut self, settings: &DirectChatSettings) -> Self {
        self.retry = RetryPolicy {
            max_attempts: settings.max_retries.max(1),
            initial_delay: Duration::from_millis(settings.initial_retry_delay_ms),
        };
        self.max_tokens = settings.max_tokens;
        self.request_timeout = Duration::from_secs(settings.request_timeout_secs);
        self
    }
}

impl std::fmt::Debug for DirectChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectChatConfig")
            .field("provider_id", &self.provider_id)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("retry", &self.retry)
            .finish()
    }
}

/// Resolve the direct chat endpoint for a provider.
///
/// Only providers that speak plain OpenAI-compatible chat are supported;
/// anything else returns `None`.
pub fn direct_chat_config(
    provider: &str,
    model_id: &str,
    base_url: Option<&str>,
    api_key: Option<String>,
) -> Option<DirectChatConfig> {
    // Any "provider/" prefix goes, not just a matching one.
    let model = model_id
        .split_once('/')
        .map(|(_, rest)| rest)
        .unwrap_or(model_id);
    let local = |default_host: &str| {
        format!("{}/v1", base_url.unwrap_or(default_host).trim_end_matches('/'))
    };

    let config = match provider {
        "ollama" => DirectChatConfig::new(provider, local("http://localhost:11434"), model),
        "lmstudio" => DirectChatConfig::new(provider, local("http://localhost:1234"), model),
        "groq" => DirectChatConfig::new(provider, "https://api.groq.com/openai/v1", model)
            .with_api_key(api_key),
        "openai" => DirectChatConfig::new(
            provider,
            base_url.unwrap_or("https://api.openai.com/v1"),
            model,
        )
        .with_api_key(api_key),
        "openrouter" => DirectChatConfig::new(provider, "https://openrouter.ai/api/v1", model)
            .with_api_key(api_key),
        "deepseek" => DirectChatConfig::new(provider, "https://api.deepseek.com/v1", model)
            .with_api_key(api_key),
        _ => return None,
    };
    debug!(provider, model = %config.model, "Direct chat endpoint resolved");
    Some(config)
}

/// One prior exchange, replayed before the new prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Observer for a direct chat call. All methods default to no-ops.
pub trait DirectChatCallbacks: Send + Sync {
    fn on_progress(&self, _message: &str) {}

    fn on_message(&self, _message: TaskMessage) {}

    fn on_complete(&self, _text: &str) {}

    fn on_error(&self, _error: &DirectChatError) {}
}

/// Callbacks that ignore everything.
pub struct NoCallbacks;

impl DirectChatCallbacks for NoCallbacks {}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectChatError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl DirectChatError {
    /// HTTP 429, or a message that mentions "429" or "rate limit".
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Api { status, message } => {
                *status == 429
                    || message.contains("429")
                    || message.to_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }
}

/// Run one chat completion, retrying only when rate limited.
///
/// On success with non-empty text, `on_message` fires before `on_complete`.
pub async fn run_direct_chat(
    prompt: &str,
    config: &DirectChatConfig,
    callbacks: &dyn DirectChatCallbacks,
    history: &[ConversationTurn],
) -> Result<String, DirectChatError> {
    callbacks.on_progress("Connecting...");

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| DirectChatError::Network(e.to_string()))?;
    let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(json!({"role": "system", "content": SYSTEM_PROMPT}));
    messages.extend(
        history
            .iter()
            .map(|turn| json!({"role": turn.role, "content": turn.content})),
    );
    messages.push(json!({"role": "user", "content": prompt}));

    let body = json!({
        "model": config.model,
        "messages": messages,
        "max_tokens": config.max_tokens,
    });

    let max_attempts = config.retry.max_attempts.max(1);
    let mut attempt = 1;
    let error = loop {
        if attempt > 1 {
            callbacks.on_progress(&format!("Retrying ({attempt}/{max_attempts})..."));
        } else {
            callbacks.on_progress("Generating response...");
        }

        match send_once(&client, &url, config.api_key.as_deref(), &body).await {
            Ok(text) => {
                if !text.is_empty() {
                    let display = sanitize_for_display(&text);
                    let display = if display.is_empty() { text.clone() } else { display };
                    callbacks.on_message(TaskMessage::assistant(display));
                }
                callbacks.on_complete(&text);
                info!(provider = %config.provider_id, attempt, "Direct chat completed");
                return Ok(text);
            }
            Err(e) if e.is_rate_limited() && attempt < max_attempts => {
                let delay = config.retry.delay_after(attempt);
                warn!(
                    provider = %config.provider_id,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => break e,
        }
    };

    warn!(provider = %config.provider_id, error = %error, "Direct chat failed");
    callbacks.on_error(&error);
    Err(error)
}

async fn send_once(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
) -> Result<String, DirectChatError> {
    let mut request = client.post(url).json(body);
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {key}"));
    }

    let response = request
        .send()
        .await
        .map_err(|e| DirectChatError::Network(e.to_string()))?;

    let status = response.status().as_u16();
    if !response.status().is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = error_message(status, &text);
        if status == 429 {
            return Err(DirectChatError::RateLimited(message));
        }
        return Err(DirectChatError::Api { status, message });
    }

    let data: ChatResponse = response
        .json()
        .await
        .map_err(|e| DirectChatError::InvalidResponse(e.to_string()))?;

    Ok(data
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default())
}

/// Prefer the provider's `error.message`, then a short raw body.
fn error_message(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body)
        && let Some(message) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
    {
        return message.to_string();
    }
    if !body.is_empty() && body.len() < 200 {
        return body.to_string();
    }
    format!("API error {status}")
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}
