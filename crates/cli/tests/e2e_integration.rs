//! End-to-end tests for the Autopilot task pipeline.
//!
//! These wire the real pieces together: config resolution, the provider
//! factory streaming from a mock OpenAI-compatible server, the tool gateway
//! and the agent adapter. Only the tool server is faked.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use autopilot_agent::{AgentAdapter, ConfigResolver};
use autopilot_config::{AppConfig, McpServerConfig, ProviderConfig};
use autopilot_core::error::ToolError;
use autopilot_core::event::AgentEvent;
use autopilot_core::task::{TaskConfig, TaskStatus};
use autopilot_core::tool::{Closeable, Tool, ToolResult};
use autopilot_providers::ProviderFactory;
use autopilot_tools::{McpServerSpec, ServerLauncher, ToolGateway, ToolServer};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Fake tool server ─────────────────────────────────────────────────────

struct NamedTool(&'static str);

#[async_trait]
impl Tool for NamedTool {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::text(format!("{} ok", self.0)))
    }
}

#[derive(Default)]
struct PlannerServer {
    closes: AtomicUsize,
}

#[async_trait]
impl Closeable for PlannerServer {
    fn name(&self) -> &str {
        "planner"
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ToolServer for PlannerServer {
    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        Ok(vec![
            Arc::new(NamedTool("start_task")),
            Arc::new(NamedTool("write_notes")),
            Arc::new(NamedTool("complete_task")),
        ])
    }
}

struct PlannerLauncher(Arc<PlannerServer>);

#[async_trait]
impl ServerLauncher for PlannerLauncher {
    async fn launch(&self, _spec: &McpServerSpec) -> Result<Arc<dyn ToolServer>, ToolError> {
        Ok(self.0.clone())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn sse(chunks: &[serde_json::Value]) -> ResponseTemplate {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn tool_call(index: u32, id: &str, name: &str, args: serde_json::Value) -> serde_json::Value {
    json!({
        "index": index,
        "id": id,
        "function": {"name": name, "arguments": args.to_string()}
    })
}

fn config(server: &MockServer, provider: &str) -> AppConfig {
    let mut config = AppConfig {
        default_provider: provider.into(),
        default_model: "llama3.2".into(),
        mcp_servers: vec![McpServerConfig {
            name: "planner".into(),
            command: vec!["planner-server".into()],
            env: Default::default(),
            enabled: true,
        }],
        ..AppConfig::default()
    };
    config.agent.stream_throttle_ms = 0;
    config.providers.insert(
        provider.into(),
        ProviderConfig {
            api_url: Some(server.uri()),
            ..ProviderConfig::default()
        },
    );
    config
}

fn adapter(config: AppConfig, server: Arc<PlannerServer>) -> AgentAdapter {
    let settings = config.agent.clone();
    AgentAdapter::new(
        Arc::new(ProviderFactory::new()),
        Arc::new(ConfigResolver::new(config)),
    )
    .with_gateway(ToolGateway::with_launcher(Arc::new(PlannerLauncher(server))))
    .with_settings(settings)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn planned_task_runs_to_completion() {
    let mock = MockServer::start().await;

    // Step 1: declare the plan.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse(&[json!({"choices": [{
            "delta": {"tool_calls": [tool_call(0, "call_1", "start_task", json!({
                "needs_planning": true,
                "goal": "Write release notes",
                "steps": ["Collect changes", "Write notes"]
            }))]},
            "finish_reason": "tool_calls"
        }]})]))
        .up_to_n_times(1)
        .mount(&mock)
        .await;

    // Step 2: do the work and signal completion.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse(&[json!({"choices": [{
            "delta": {"tool_calls": [
                tool_call(0, "call_2", "write_notes", json!({"text": "v1.2"})),
                tool_call(1, "call_3", "complete_task", json!({"summary": "notes written"}))
            ]},
            "finish_reason": "tool_calls"
        }]})]))
        .up_to_n_times(1)
        .mount(&mock)
        .await;

    // Step 3: final answer.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse(&[
            json!({"choices": [{"delta": {"content": "Release notes "}, "finish_reason": null}]}),
            json!({"choices": [{"delta": {"content": "are done."}, "finish_reason": "stop"}]}),
        ]))
        .up_to_n_times(1)
        .mount(&mock)
        .await;

    let server = Arc::new(PlannerServer::default());
    let adapter = adapter(config(&mock, "ollama"), server.clone());
    let mut rx = adapter.subscribe();

    let task = adapter
        .start_task(TaskConfig::new("Write the release notes for v1.2"))
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Success);
    assert!(task.session_id.starts_with("agent-"));
    assert_eq!(mock.received_requests().await.unwrap().len(), 3);
    assert_eq!(server.closes.load(Ordering::SeqCst), 1);

    let events = rx.drain();
    let tools_used: Vec<&str> = events
        .iter()
        .filter_map(|e| match e.as_ref() {
            AgentEvent::ToolUse { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tools_used, vec!["start_task", "write_notes", "complete_task"]);

    let plan = events
        .iter()
        .find_map(|e| match e.as_ref() {
            AgentEvent::TodoUpdate { todos } => Some(todos.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(plan.len(), 2);

    let completions: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.as_ref(), AgentEvent::Complete { .. }))
        .collect();
    assert_eq!(completions.len(), 1);
    assert!(events.last().unwrap().is_terminal());

    let last = adapter.messages().last().cloned().unwrap();
    assert_eq!(last.content, "Release notes are done.");
}

#[tokio::test]
async fn provider_error_finishes_task_with_error() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&mock)
        .await;

    let server = Arc::new(PlannerServer::default());
    let adapter = adapter(config(&mock, "ollama"), server.clone());
    let mut rx = adapter.subscribe();

    let task = adapter.start_task(TaskConfig::new("Do it")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(server.closes.load(Ordering::SeqCst), 1);

    let events = rx.drain();
    let error = events
        .iter()
        .find_map(|e| match e.as_ref() {
            AgentEvent::Error { message } => Some(message.clone()),
            _ => None,
        })
        .unwrap();
    assert!(error.contains("model not loaded"), "{error}");
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn unknown_provider_is_reported_before_any_request() {
    let mock = MockServer::start().await;
    let server = Arc::new(PlannerServer::default());
    let adapter = adapter(config(&mock, "carrier-pigeon"), server.clone());
    let mut rx = adapter.subscribe();

    let task = adapter.start_task(TaskConfig::new("Do it")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Error);
    assert!(mock.received_requests().await.unwrap().is_empty());
    assert_eq!(server.closes.load(Ordering::SeqCst), 0);

    let names: Vec<&str> = rx.drain().iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["error", "complete"]);
}
