//! End-to-end tests for the agent adapter, driven by a scripted model and
//! fake tool servers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autopilot_agent::{
    AgentAdapter, AgentConfig, AgentConfigResolver, CONTINUATION_NOTE, ConfigResolver,
    SETTING_MCP_SERVERS, SETTING_SYSTEM_PROMPT, TaskContext, TaskHooks,
};
use autopilot_config::{AgentSettings, AppConfig, McpServerConfig};
use autopilot_core::error::{AgentError, ProviderError, ToolError};
use autopilot_core::event::AgentEvent;
use autopilot_core::provider::{
    FinishReason, LanguageModel, ModelFactory, ModelSpec, StepEvent, StepStream, StreamRequest,
    ToolChoice,
};
use autopilot_core::task::{TaskConfig, TaskResult, TaskStatus, TodoStatus};
use autopilot_core::tool::{Closeable, Tool, ToolResult, ToolSet};
use autopilot_tools::{McpServerSpec, ServerLauncher, ToolGateway, ToolServer};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

// ── Scripted model ─────────────────────────────────────────────────────

#[derive(Clone)]
enum Step {
    Text(&'static str),
    Call(&'static str, serde_json::Value),
    End(FinishReason),
    Finish(FinishReason),
    Fail(&'static str),
    /// Stop producing events until the task is cancelled
    Hang,
}

struct ScriptedModel {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedModel {
    fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> StreamRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-1"
    }

    async fn stream(
        &self,
        request: StreamRequest,
        tools: Arc<ToolSet>,
        cancel: CancellationToken,
    ) -> Result<StepStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Step::Finish(FinishReason::Stop)]);

        let (tx, rx) = mpsc::channel(64);
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut call_index = 0;
            for step in script {
                let events = match step {
                    Step::Text(text) => vec![Ok(StepEvent::TextDelta { text: text.into() })],
                    Step::Call(name, args) => {
                        call_index += 1;
                        let id = format!("call_{call_index}");
                        let result = match tools.call(name, args.clone()).await {
                            Ok(result) => result.payload(),
                            Err(e) => json!(format!("Error: {e}")),
                        };
                        vec![
                            Ok(StepEvent::ToolCall {
                                id: id.clone(),
                                name: name.into(),
                                args: args.clone(),
                            }),
                            Ok(StepEvent::ToolResult {
                                id,
                                name: name.into(),
                                args,
                                result,
                            }),
                        ]
                    }
                    Step::End(reason) => vec![Ok(StepEvent::StepFinish { reason })],
                    Step::Finish(reason) => vec![Ok(StepEvent::Finish { reason })],
                    Step::Fail(reason) => vec![Err(ProviderError::StreamInterrupted(reason.into()))],
                    Step::Hang => {
                        token.cancelled().await;
                        return;
                    }
                };
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(
            ReceiverStream::new(rx).take_until(cancel.cancelled_owned()),
        ))
    }
}

struct ScriptedFactory(Arc<ScriptedModel>);

impl ModelFactory for ScriptedFactory {
    fn create_model(&self, spec: &ModelSpec) -> Option<Arc<dyn LanguageModel>> {
        (spec.provider == "scripted").then(|| self.0.clone() as Arc<dyn LanguageModel>)
    }
}

// ── Fake tool servers ──────────────────────────────────────────────────

struct FakeTool(String);

#[async_trait]
impl Tool for FakeTool {
    fn name(&self) -> &str {
        &self.0
    }
    fn description(&self) -> &str {
        "fake tool"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: serde_json::Value) -> Result<ToolResult, ToolError> {
        if self.0 == "hb_scout_search_hackathons" {
            return Ok(ToolResult {
                success: true,
                output: String::new(),
                data: Some(json!({"content": [{"type": "text", "text": "## AI Hackathon 2026"}]})),
            });
        }
        Ok(ToolResult::text(format!("did {}", self.0)))
    }
}

struct FakeServer {
    name: String,
    tools: Vec<String>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Closeable for FakeServer {
    fn name(&self) -> &str {
        &self.name
    }
    async fn close(&self) -> Result<(), ToolError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ToolServer for FakeServer {
    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        Ok(self
            .tools
            .iter()
            .map(|t| Arc::new(FakeTool(t.clone())) as Arc<dyn Tool>)
            .collect())
    }
}

#[derive(Default)]
struct FakeLauncher {
    servers: HashMap<String, Vec<String>>,
    broken: Vec<String>,
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ServerLauncher for FakeLauncher {
    async fn launch(&self, spec: &McpServerSpec) -> Result<Arc<dyn ToolServer>, ToolError> {
        if self.broken.contains(&spec.name) {
            return Err(ToolError::ConnectionFailed {
                server: spec.name.clone(),
                reason: "spawn failed".into(),
            });
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeServer {
            name: spec.name.clone(),
            tools: self.servers.get(&spec.name).cloned().unwrap_or_default(),
            closes: self.closes.clone(),
        }))
    }
}

// ── Harness ────────────────────────────────────────────────────────────

struct StaticResolver(AgentConfig);

#[async_trait]
impl AgentConfigResolver for StaticResolver {
    async fn resolve(&self, _ctx: &TaskContext) -> Result<AgentConfig, AgentError> {
        Ok(self.0.clone())
    }
}

struct Harness {
    adapter: Arc<AgentAdapter>,
    model: Arc<ScriptedModel>,
    launcher: Arc<FakeLauncher>,
}

impl Harness {
    fn launches(&self) -> usize {
        self.launcher.launches.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.launcher.closes.load(Ordering::SeqCst)
    }
}

struct Setup {
    provider: &'static str,
    servers: Vec<(&'static str, Vec<&'static str>)>,
    broken: Vec<&'static str>,
    scripts: Vec<Vec<Step>>,
    hooks: Option<Arc<dyn TaskHooks>>,
    /// Resolve through `ConfigResolver` instead of a fixed config
    from_app_config: bool,
}

impl Setup {
    fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            provider: "scripted",
            servers: Vec::new(),
            broken: Vec::new(),
            scripts,
            hooks: None,
            from_app_config: false,
        }
    }

    fn server(mut self, name: &'static str, tools: &[&'static str]) -> Self {
        self.servers.push((name, tools.to_vec()));
        self
    }

    fn broken(mut self, name: &'static str) -> Self {
        self.servers.push((name, vec![]));
        self.broken.push(name);
        self
    }

    fn provider(mut self, provider: &'static str) -> Self {
        self.provider = provider;
        self
    }

    fn hooks(mut self, hooks: Arc<dyn TaskHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    fn from_app_config(mut self) -> Self {
        self.from_app_config = true;
        self
    }

    fn build(self) -> Harness {
        let model = ScriptedModel::new(self.scripts);
        let launcher = Arc::new(FakeLauncher {
            servers: self
                .servers
                .iter()
                .map(|(name, tools)| (name.to_string(), tools.iter().map(|t| t.to_string()).collect()))
                .collect(),
            broken: self.broken.iter().map(|b| b.to_string()).collect(),
            ..FakeLauncher::default()
        });
        let config = AgentConfig {
            system_prompt: "You are a test agent.".into(),
            mcp_servers: self
                .servers
                .iter()
                .map(|(name, _)| McpServerSpec::new(*name, vec![format!("{name}-server")]))
                .collect(),
            provider: self.provider.into(),
            model_id: "scripted-1".into(),
            api_key: None,
            base_url: None,
        };

        let resolver: Arc<dyn AgentConfigResolver> = if self.from_app_config {
            Arc::new(ConfigResolver::new(AppConfig {
                default_provider: self.provider.into(),
                default_model: "scripted-1".into(),
                mcp_servers: self
                    .servers
                    .iter()
                    .map(|(name, _)| McpServerConfig {
                        name: name.to_string(),
                        command: vec![format!("{name}-server")],
                        env: HashMap::new(),
                        enabled: true,
                    })
                    .collect(),
                ..AppConfig::default()
            }))
        } else {
            Arc::new(StaticResolver(config))
        };

        let mut adapter = AgentAdapter::new(Arc::new(ScriptedFactory(model.clone())), resolver)
        .with_gateway(ToolGateway::with_launcher(launcher.clone()))
        .with_settings(AgentSettings::default());
        if let Some(hooks) = self.hooks {
            adapter = adapter.with_hooks(hooks);
        }

        Harness {
            adapter: Arc::new(adapter),
            model,
            launcher,
        }
    }
}

fn completions(events: &[Arc<AgentEvent>]) -> Vec<TaskResult> {
    events
        .iter()
        .filter_map(|e| match e.as_ref() {
            AgentEvent::Complete { result } => Some(result.clone()),
            _ => None,
        })
        .collect()
}

fn names(events: &[Arc<AgentEvent>]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

fn plan_input() -> serde_json::Value {
    json!({"needs_planning": true, "goal": "X", "steps": ["a", "b"]})
}

// ── Tests ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn no_plan_stop_completes_with_success() {
    let h = Setup::new(vec![vec![
        Step::Text("Hello"),
        Step::Text(" there"),
        Step::End(FinishReason::Stop),
        Step::Finish(FinishReason::Stop),
    ]])
    .build();
    let mut rx = h.adapter.subscribe();

    let task = h
        .adapter
        .start_task(TaskConfig::new("say hello"))
        .await
        .unwrap();
    let events = rx.drain();

    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(h.model.calls(), 1);
    assert_eq!(h.model.request(0).tool_choice, ToolChoice::Auto);

    let results = completions(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, TaskStatus::Success);
    assert_eq!(results[0].session_id.as_deref(), Some(task.session_id.as_str()));
    assert!(events.last().unwrap().is_terminal());

    // Every revision of the turn reuses one id and the last one is complete.
    let messages: Vec<_> = events
        .iter()
        .filter_map(|e| match e.as_ref() {
            AgentEvent::Message { message } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert!(!messages.is_empty());
    assert!(messages.iter().all(|m| m.id == messages[0].id));
    assert_eq!(messages.last().unwrap().content, "Hello there");
    assert_eq!(task.messages.len(), 1);
    assert_eq!(task.messages[0].content, "Hello there");
    assert!(!h.adapter.is_running());
}

#[tokio::test]
async fn plan_with_completion_tool_finishes_in_one_pass() {
    let h = Setup::new(vec![vec![
        Step::Call("start_task", plan_input()),
        Step::End(FinishReason::ToolCalls),
        Step::Call("do_thing", json!({})),
        Step::End(FinishReason::ToolCalls),
        Step::Call("complete_task", json!({"summary": "did X"})),
        Step::End(FinishReason::ToolCalls),
        Step::Text("All done."),
        Step::End(FinishReason::Stop),
        Step::Finish(FinishReason::Stop),
    ]])
    .server("hb", &["start_task", "do_thing", "complete_task"])
    .build();
    let mut rx = h.adapter.subscribe();

    let task = h.adapter.start_task(TaskConfig::new("do X")).await.unwrap();
    let events = rx.drain();

    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(h.model.calls(), 1);
    assert_eq!(
        h.model.request(0).tool_choice,
        ToolChoice::Tool {
            name: "start_task".into()
        }
    );

    let todos = events
        .iter()
        .find_map(|e| match e.as_ref() {
            AgentEvent::TodoUpdate { todos } => Some(todos.clone()),
            _ => None,
        })
        .expect("todo:update");
    assert_eq!(todos.len(), 2);
    assert_eq!(todos[0].status, TodoStatus::InProgress);
    assert_eq!(todos[1].status, TodoStatus::Pending);

    assert!(events.iter().any(|e| matches!(
        e.as_ref(),
        AgentEvent::ToolUse { name, .. } if name == "do_thing"
    )));
    assert!(events.iter().any(|e| matches!(
        e.as_ref(),
        AgentEvent::ToolResult { output } if output == "did do_thing"
    )));
    assert!(events.iter().any(|e| matches!(
        e.as_ref(),
        AgentEvent::ToolCallComplete { tool_name, tool_output, .. }
            if tool_name == "do_thing" && tool_output == "did do_thing"
    )));

    let results = completions(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, TaskStatus::Success);
    assert!(events.last().unwrap().is_terminal());
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn plan_without_completion_gets_one_continuation_then_forced_success() {
    let h = Setup::new(vec![
        vec![
            Step::Call("start_task", plan_input()),
            Step::End(FinishReason::ToolCalls),
            Step::Call("do_thing", json!({})),
            Step::End(FinishReason::ToolCalls),
            Step::Text("I did part of it."),
            Step::End(FinishReason::Stop),
            Step::Finish(FinishReason::Stop),
        ],
        vec![
            Step::Text("Still going."),
            Step::End(FinishReason::Stop),
            Step::Finish(FinishReason::Stop),
        ],
    ])
    .server("hb", &["start_task", "do_thing", "complete_task"])
    .build();
    let mut rx = h.adapter.subscribe();

    let task = h.adapter.start_task(TaskConfig::new("do X")).await.unwrap();
    let events = rx.drain();

    assert_eq!(h.model.calls(), 2, "exactly one continuation");
    let nudge = h.model.request(1).prompt;
    assert!(nudge.contains("complete_task"));
    assert!(nudge.contains("- a"));
    assert!(nudge.contains("- b"));

    assert_eq!(task.status, TaskStatus::Success);
    let results = completions(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, TaskStatus::Success);

    // The session and message history survive the continuation.
    assert_eq!(task.messages.len(), 2);
    assert_eq!(h.adapter.session_id().as_deref(), Some(task.session_id.as_str()));

    // Tools were reconnected for the continuation; every connection closed once.
    assert_eq!(h.launches(), 2);
    assert_eq!(h.closes(), 2);
}

#[tokio::test]
async fn cancel_emits_one_interrupted_and_is_idempotent() {
    let h = Setup::new(vec![vec![Step::Text("working"), Step::Hang]])
        .server("hb", &["do_thing"])
        .build();
    let mut rx = h.adapter.subscribe();

    let adapter = h.adapter.clone();
    let run = tokio::spawn(async move { adapter.start_task(TaskConfig::new("long job")).await });

    // Wait until the model is streaming.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event before timeout")
            .expect("bus open");
        if matches!(event.as_ref(), AgentEvent::Message { .. }) {
            break;
        }
    }
    assert!(h.adapter.is_running());

    h.adapter.cancel_task();
    h.adapter.cancel_task();
    let task = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("task settles after cancel")
        .unwrap()
        .unwrap();
    h.adapter.interrupt_task();

    let events = rx.drain();
    let results = completions(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, TaskStatus::Interrupted);
    assert_eq!(task.status, TaskStatus::Interrupted);
    assert!(!h.adapter.is_running());
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn cancel_after_completion_emits_nothing() {
    let h = Setup::new(vec![vec![Step::Text("hi"), Step::Finish(FinishReason::Stop)]]).build();
    h.adapter.start_task(TaskConfig::new("hi")).await.unwrap();

    let mut rx = h.adapter.subscribe();
    h.adapter.cancel_task();
    h.adapter.cancel_task();
    assert!(rx.drain().is_empty());
}

#[tokio::test]
async fn unsupported_provider_reports_error_then_complete() {
    let h = Setup::new(vec![]).provider("mystery").server("hb", &["do_thing"]).build();
    let mut rx = h.adapter.subscribe();

    let task = h.adapter.start_task(TaskConfig::new("anything")).await.unwrap();
    let events = rx.drain();

    assert_eq!(names(&events), vec!["error", "complete"]);
    let results = completions(&events);
    assert_eq!(results[0].status, TaskStatus::Error);
    assert!(results[0].error.as_deref().unwrap().starts_with("Unsupported provider: mystery"));
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(h.model.calls(), 0);
    assert_eq!(h.launches(), 0);
}

#[tokio::test]
async fn tool_connection_failure_closes_what_was_opened() {
    let h = Setup::new(vec![])
        .server("first", &["a"])
        .broken("second")
        .server("third", &["c"])
        .build();
    let mut rx = h.adapter.subscribe();

    let task = h.adapter.start_task(TaskConfig::new("anything")).await.unwrap();
    let events = rx.drain();

    assert_eq!(task.status, TaskStatus::Error);
    let results = completions(&events);
    assert_eq!(results.len(), 1);
    assert!(results[0].error.as_deref().unwrap().contains("second"));
    assert!(events.iter().any(|e| e.name() == "error"));
    assert_eq!(h.launches(), 1);
    assert_eq!(h.closes(), 1);
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn stream_error_reports_error_then_complete() {
    let h = Setup::new(vec![vec![Step::Text("partial"), Step::Fail("connection reset")]])
        .server("hb", &["do_thing"])
        .build();
    let mut rx = h.adapter.subscribe();

    let task = h.adapter.start_task(TaskConfig::new("anything")).await.unwrap();
    let events = rx.drain();

    assert_eq!(task.status, TaskStatus::Error);
    let results = completions(&events);
    assert_eq!(results.len(), 1);
    assert!(results[0].error.as_deref().unwrap().contains("connection reset"));
    let error_at = events.iter().position(|e| e.name() == "error").unwrap();
    let complete_at = events.iter().position(|e| e.is_terminal()).unwrap();
    assert!(error_at < complete_at);
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn silent_model_with_tools_gets_fallback_message() {
    let h = Setup::new(vec![vec![
        Step::End(FinishReason::Stop),
        Step::Finish(FinishReason::Stop),
    ]])
    .server("hb", &["do_thing"])
    .build();

    let task = h.adapter.start_task(TaskConfig::new("anything")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.messages.len(), 1);
    assert!(task.messages[0].content.starts_with("The model returned no output"));
    assert_eq!(h.model.request(0).tool_choice, ToolChoice::Required);
}

#[tokio::test]
async fn tool_before_start_task_is_flagged() {
    let h = Setup::new(vec![vec![
        Step::Call("do_thing", json!({})),
        Step::End(FinishReason::ToolCalls),
        Step::Finish(FinishReason::Stop),
    ]])
    .server("hb", &["start_task", "do_thing"])
    .build();
    let mut rx = h.adapter.subscribe();

    let task = h.adapter.start_task(TaskConfig::new("go")).await.unwrap();
    let events = rx.drain();

    assert_eq!(task.status, TaskStatus::Success);
    assert!(events.iter().any(|e| matches!(
        e.as_ref(),
        AgentEvent::Debug { kind, message, .. }
            if kind == "warning" && message == "Tool \"do_thing\" called before start_task"
    )));
}

#[tokio::test]
async fn todowrite_merges_into_plan() {
    let h = Setup::new(vec![vec![
        Step::Call("start_task", plan_input()),
        Step::Call(
            "todowrite",
            json!({"todos": [{"id": "1", "content": "a", "status": "completed"}]}),
        ),
        Step::Call("complete_task", json!({})),
        Step::End(FinishReason::ToolCalls),
        Step::Finish(FinishReason::Stop),
    ]])
    .server("hb", &["start_task", "todowrite", "complete_task"])
    .build();

    let task = h.adapter.start_task(TaskConfig::new("plan")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Success);
    let todos = h.adapter.todos();
    assert_eq!(todos.len(), 2);
    assert_eq!(todos[0].status, TodoStatus::Done);
    assert_eq!(todos[1].status, TodoStatus::Pending);
}

#[tokio::test]
async fn hackathon_search_bypasses_the_model() {
    let h = Setup::new(vec![])
        .server("hb", &["hb_scout_search_hackathons", "start_task"])
        .build();
    let mut rx = h.adapter.subscribe();

    let task = h
        .adapter
        .start_task(TaskConfig::new("find AI hackathons"))
        .await
        .unwrap();
    let events = rx.drain();

    assert_eq!(h.model.calls(), 0);
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.messages.len(), 1);
    assert_eq!(task.messages[0].content, "## AI Hackathon 2026");
    assert!(events.iter().any(|e| matches!(
        e.as_ref(),
        AgentEvent::Progress { message: Some(m), .. } if m == "Searching hackathons..."
    )));
    assert_eq!(completions(&events).len(), 1);
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn progress_reports_loading_then_connecting() {
    let h = Setup::new(vec![vec![Step::Text("ok"), Step::Finish(FinishReason::Stop)]]).build();
    let mut rx = h.adapter.subscribe();

    h.adapter.start_task(TaskConfig::new("hi")).await.unwrap();
    let stages: Vec<String> = rx
        .drain()
        .iter()
        .filter_map(|e| match e.as_ref() {
            AgentEvent::Progress { message, .. } => message.clone(),
            _ => None,
        })
        .collect();

    assert_eq!(stages, vec!["Connecting to AI...", "Running with AI..."]);
}

struct FailingPrepare;

#[async_trait]
impl TaskHooks for FailingPrepare {
    async fn prepare(&self, _ctx: &mut TaskContext) -> Result<(), AgentError> {
        Err(AgentError::Hook("environment not ready".into()))
    }
}

#[tokio::test]
async fn pre_start_hook_failure_fails_the_task() {
    let h = Setup::new(vec![]).hooks(Arc::new(FailingPrepare)).build();
    let mut rx = h.adapter.subscribe();

    let task = h.adapter.start_task(TaskConfig::new("hi")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(names(&rx.drain()), vec!["error", "complete"]);
    assert_eq!(h.model.calls(), 0);
}

/// Restricts the task to one server and swaps the system prompt.
struct ScoutOnly;

#[async_trait]
impl TaskHooks for ScoutOnly {
    async fn prepare(&self, ctx: &mut TaskContext) -> Result<(), AgentError> {
        ctx.set(SETTING_MCP_SERVERS, "hb");
        ctx.set(SETTING_SYSTEM_PROMPT, "Search hackathons only.");
        Ok(())
    }
}

#[tokio::test]
async fn hook_settings_choose_servers_for_every_pass() {
    let h = Setup::new(vec![
        vec![
            Step::Call("start_task", plan_input()),
            Step::End(FinishReason::ToolCalls),
            Step::Text("Partway."),
            Step::End(FinishReason::Stop),
            Step::Finish(FinishReason::Stop),
        ],
        vec![
            Step::Text("Done."),
            Step::End(FinishReason::Stop),
            Step::Finish(FinishReason::Stop),
        ],
    ])
    .server("hb", &["start_task", "complete_task"])
    .server("browser", &["browser_navigate"])
    .hooks(Arc::new(ScoutOnly))
    .from_app_config()
    .build();

    let task = h.adapter.start_task(TaskConfig::new("find hackathons")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(h.model.calls(), 2);
    // Only "hb" is launched, once for the first pass and once for the continuation.
    assert_eq!(h.launches(), 2);

    let first = h.model.request(0).system_prompt;
    assert_eq!(first, "Search hackathons only.");
    let second = h.model.request(1).system_prompt;
    assert!(second.starts_with("Search hackathons only."));
    assert!(second.ends_with(CONTINUATION_NOTE));
}

#[tokio::test]
async fn resume_keeps_the_session_id() {
    let h = Setup::new(vec![vec![Step::Text("again"), Step::Finish(FinishReason::Stop)]]).build();

    let task = h
        .adapter
        .resume_session("agent-previous", "keep going")
        .await
        .unwrap();

    assert_eq!(task.session_id, "agent-previous");
    assert_eq!(task.prompt, "keep going");
    assert_eq!(h.adapter.session_id().as_deref(), Some("agent-previous"));
    assert!(h.adapter.task_id().is_some());
}

#[tokio::test]
async fn dispose_is_idempotent_and_blocks_new_tasks() {
    let h = Setup::new(vec![]).build();
    h.adapter.dispose().await;
    h.adapter.dispose().await;

    assert!(h.adapter.is_disposed());
    let err = h.adapter.start_task(TaskConfig::new("hi")).await.unwrap_err();
    assert!(matches!(err, AgentError::Disposed));
    assert_eq!(h.model.calls(), 0);
    h.adapter.send_response("yes").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispose_racing_start_never_leaves_a_task_running() {
    for _ in 0..50 {
        let h = Setup::new(vec![vec![Step::Text("working"), Step::Hang]])
            .server("hb", &["do_thing"])
            .build();

        let adapter = h.adapter.clone();
        let run = tokio::spawn(async move { adapter.start_task(TaskConfig::new("long job")).await });
        let adapter = h.adapter.clone();
        let dispose = tokio::spawn(async move { adapter.dispose().await });

        let outcome = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("task outlived dispose")
            .unwrap();
        dispose.await.unwrap();

        match outcome {
            Err(AgentError::Disposed) => {}
            Ok(task) => assert_eq!(task.status, TaskStatus::Interrupted),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}

#[tokio::test]
async fn dispose_interrupts_a_running_task() {
    let h = Setup::new(vec![vec![Step::Text("working"), Step::Hang]])
        .server("hb", &["do_thing"])
        .build();
    let mut rx = h.adapter.subscribe();

    let adapter = h.adapter.clone();
    let run = tokio::spawn(async move { adapter.start_task(TaskConfig::new("long job")).await });
    while let Some(event) = rx.recv().await {
        if matches!(event.as_ref(), AgentEvent::Message { .. }) {
            break;
        }
    }

    h.adapter.dispose().await;
    let task = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("task settles after dispose")
        .unwrap()
        .unwrap();

    assert_eq!(task.status, TaskStatus::Interrupted);
    assert_eq!(h.closes(), 1);
}
