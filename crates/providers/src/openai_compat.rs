//! OpenAI-compatible streaming model.
//!
//! Works with: OpenAI, OpenRouter, Groq, DeepSeek, Ollama, LM Studio,
//! LiteLLM and any other endpoint exposing `/chat/completions` with SSE.
//!
//! One [`LanguageModel::stream`] call runs up to `max_steps` chat requests.
//! Tool calls the model makes are executed against the supplied [`ToolSet`]
//! and fed back as `tool` messages before the next step.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autopilot_core::error::ProviderError;
use autopilot_core::provider::{
    FinishReason, LanguageModel, StepEvent, StepStream, StreamRequest, ToolChoice,
};
use autopilot_core::tool::{ToolDefinition, ToolSet};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A model served from an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiCompatModel {
    provider: String,
    model_id: String,
    base_url: String,
    api_key: Option<String>,
    rejects_required: bool,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            rejects_required: false,
            client,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Mark the provider as refusing `tool_choice: "required"`.
    pub fn with_rejects_required(mut self, rejects: bool) -> Self {
        self.rejects_required = rejects;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn request_body(
        &self,
        messages: &[Value],
        tools: &[ToolDefinition],
        tool_choice: &ToolChoice,
        max_tokens: Option<u32>,
    ) -> Value {
        let mut body = json!({
            "model": self.model_id,
            "messages": messages,
            "stream": true,
        });

        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(api_tool).collect());
            body["tool_choice"] = tool_choice_json(tool_choice);
        }

        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.provider, status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    /// Run the multi-step exchange, pushing events into `tx`.
    ///
    /// Returns `Ok` early when the receiver is gone or `cancel` fires.
    async fn drive(
        &self,
        request: StreamRequest,
        tools: Arc<ToolSet>,
        cancel: CancellationToken,
        tx: mpsc::Sender<Result<StepEvent, ProviderError>>,
    ) -> Result<(), ProviderError> {
        let definitions = tools.definitions();
        let mut messages = vec![
            json!({"role": "system", "content": request.system_prompt}),
            json!({"role": "user", "content": request.prompt}),
        ];
        let mut last_reason = FinishReason::Stop;

        for step in 0..request.max_steps.max(1) {
            let tool_choice = if step == 0 {
                request.tool_choice.clone()
            } else {
                ToolChoice::Auto
            };
            let body = self.request_body(&messages, &definitions, &tool_choice, request.max_tokens);
            debug!(provider = %self.provider, model = %self.model_id, step, "Sending streaming request");

            let Some(response) = or_cancel(&cancel, self.send(&body)).await else {
                return Ok(());
            };
            let mut bytes = response?.bytes_stream();
            let mut sse = SseBuffer::default();
            let mut turn = TurnParser::default();

            'read: loop {
                let Some(chunk) = or_cancel(&cancel, bytes.next()).await else {
                    return Ok(());
                };
                let Some(chunk) = chunk else {
                    break;
                };
                let chunk = chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;
                for data in sse.push(&chunk) {
                    if data == "[DONE]" {
                        break 'read;
                    }
                    for event in turn.apply(&data)? {
                        if !emit(&tx, event).await {
                            return Ok(());
                        }
                    }
                }
            }

            let outcome = turn.finish(step);
            if outcome.calls.is_empty() {
                let reason = outcome.reason;
                if !emit(&tx, StepEvent::StepFinish { reason: reason.clone() }).await {
                    return Ok(());
                }
                emit(&tx, StepEvent::Finish { reason }).await;
                return Ok(());
            }

            let content = if outcome.text.is_empty() {
                Value::Null
            } else {
                Value::String(outcome.text)
            };
            let api_calls: Vec<Value> = outcome
                .calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments},
                    })
                })
                .collect();
            messages.push(json!({
                "role": "assistant",
                "content": content,
                "tool_calls": api_calls,
            }));

            for call in outcome.calls {
                let args = call.parsed_arguments();
                let event = StepEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: args.clone(),
                };
                if !emit(&tx, event).await {
                    return Ok(());
                }

                let Some(executed) = or_cancel(&cancel, tools.call(&call.name, args.clone())).await
                else {
                    return Ok(());
                };
                let (result, content) = match executed {
                    Ok(result) => (result.payload(), result.output),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool call failed");
                        let message = format!("Error: {e}");
                        (Value::String(message.clone()), message)
                    }
                };

                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": content,
                }));

                let event = StepEvent::ToolResult {
                    id: call.id,
                    name: call.name,
                    args,
                    result,
                };
                if !emit(&tx, event).await {
                    return Ok(());
                }
            }

            last_reason = FinishReason::ToolCalls;
            let event = StepEvent::StepFinish {
                reason: FinishReason::ToolCalls,
            };
            if !emit(&tx, event).await {
                return Ok(());
            }
        }

        debug!(provider = %self.provider, max_steps = request.max_steps, "Step budget exhausted");
        emit(&tx, StepEvent::Finish { reason: last_reason }).await;
        Ok(())
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn rejects_required_tool_choice(&self) -> bool {
        self.rejects_required
    }

    async fn stream(
        &self,
        request: StreamRequest,
        tools: Arc<ToolSet>,
        cancel: CancellationToken,
    ) -> Result<StepStream, ProviderError> {
        let (tx, rx) = mpsc::channel(64);
        let model = self.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            if let Err(e) = model.drive(request, tools, task_cancel, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        // Nothing buffered is delivered once cancellation fires.
        let events = ReceiverStream::new(rx).take_until(cancel.cancelled_owned());
        Ok(Box::pin(events))
    }
}

impl std::fmt::Debug for OpenAiCompatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatModel")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

async fn or_cancel<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

async fn emit(tx: &mpsc::Sender<Result<StepEvent, ProviderError>>, event: StepEvent) -> bool {
    tx.send(Ok(event)).await.is_ok()
}

fn api_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// Wire form of a [`ToolChoice`].
pub(crate) fn tool_choice_json(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Tool { name } => json!({
            "type": "function",
            "function": {"name": name},
        }),
    }
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across chunks decode correctly.
#[derive(Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim().to_string());
            }
        }

        payloads
    }
}

/// Folds the chunks of one step into events plus the step outcome.
#[derive(Default)]
struct TurnParser {
    text: String,
    calls: BTreeMap<u32, ToolCallAccumulator>,
    finish_reason: Option<String>,
}

struct TurnOutcome {
    text: String,
    calls: Vec<PendingCall>,
    reason: FinishReason,
}

impl TurnParser {
    fn apply(&mut self, data: &str) -> Result<Vec<StepEvent>, ProviderError> {
        let chunk: StreamResponse = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return Ok(Vec::new());
            }
        };

        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ProviderError::StreamInterrupted(message));
        }

        let mut events = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(events);
        };
        let delta = choice.delta;

        if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning)
            && !reasoning.is_empty()
        {
            events.push(StepEvent::ReasoningDelta { text: reasoning });
        }

        if let Some(content) = delta.content
            && !content.is_empty()
        {
            self.text.push_str(&content);
            events.push(StepEvent::TextDelta { text: content });
        }

        for tc in delta.tool_calls.unwrap_or_default() {
            let acc = self.calls.entry(tc.index).or_default();
            if let Some(id) = tc.id {
                acc.id = id;
            }
            if let Some(function) = tc.function {
                if let Some(name) = function.name {
                    acc.name = name;
                }
                if let Some(arguments) = function.arguments {
                    acc.arguments.push_str(&arguments);
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        Ok(events)
    }

    fn finish(self, step: u32) -> TurnOutcome {
        let calls: Vec<PendingCall> = self
            .calls
            .into_iter()
            .filter(|(_, acc)| !acc.name.is_empty())
            .map(|(index, acc)| PendingCall {
                id: if acc.id.is_empty() {
                    format!("call_{step}_{index}")
                } else {
                    acc.id
                },
                name: acc.name,
                arguments: acc.arguments,
            })
            .collect();

        // Calls are executed regardless of what the provider reported.
        let reason = if !calls.is_empty() {
            FinishReason::ToolCalls
        } else {
            self.finish_reason
                .as_deref()
                .map(FinishReason::parse)
                .unwrap_or(FinishReason::Stop)
        };

        TurnOutcome {
            text: self.text,
            calls,
            reason,
        }
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn parsed_arguments(&self) -> Value {
        if self.arguments.trim().is_empty() {
            return json!({});
        }
        serde_json::from_str(&self.arguments).unwrap_or_else(|e| {
            debug!(tool = %self.name, error = %e, "Tool arguments are not valid JSON");
            json!({})
        })
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
