//! The agent adapter: runs one task at a time from prompt to terminal event.
//!
//! `start_task` drives the whole task:
//!
//! 1. **Reset** per-task state and allocate task/session ids
//! 2. **Prepare**: pre-start hooks, config resolution, model creation
//! 3. **Connect** the tool servers through the gateway
//! 4. **Bypass** a recognised intent directly, or **stream** the model,
//!    folding step events into messages, tool events and plan updates
//! 5. **Enforce** completion: a stop without `complete_task` after a declared
//!    plan earns a bounded continuation, then a forced finish
//! 6. **Close** every tool connection, whatever happened
//!
//! Exactly one `complete` event is published per task. Cancellation is a
//! single token per task; every await of the task races against it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use autopilot_config::AgentSettings;
use autopilot_core::display::{display_tool_output, sanitize_for_display};
use autopilot_core::error::AgentError;
use autopilot_core::event::{AgentEvent, EventBus, EventReceiver, ProgressStage};
use autopilot_core::message::{TaskMessage, upsert};
use autopilot_core::provider::{
    FinishReason, LanguageModel, ModelFactory, StepEvent, StopReason, StreamRequest, ToolChoice,
};
use autopilot_core::task::{Task, TaskConfig, TaskResult, TaskStatus, TodoItem, new_task_id};
use autopilot_core::tool::{ConnectionSet, ToolSet};
use autopilot_tools::{McpServerSpec, ToolGateway};
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent_config::{AgentConfig, AgentConfigResolver};
use crate::bypass::DirectSearch;
use crate::completion::{CompletionEnforcer, ExitAction, Verdict};
use crate::hooks::{NoHooks, TaskContext, TaskHooks, run_pre_start};
use crate::policy;
use crate::turn::TurnAccumulator;

pub const SESSION_PREFIX: &str = "agent-";

const DEFAULT_DISPLAY_NAME: &str = "AI";

const EMPTY_OUTPUT_MESSAGE: &str = "The model returned no output. Try a larger model in Settings (e.g. Groq llama-3.1-70b-versatile, Ollama llama3.2:3b, or Claude). Small models often struggle with many tools.";

/// Generate a session id for a fresh agent task.
pub fn new_session_id() -> String {
    format!("{SESSION_PREFIX}{}", Uuid::new_v4().simple())
}

/// Mutable per-task state. Never held across an await.
struct TaskState {
    task_id: Option<String>,
    session_id: Option<String>,
    messages: Vec<TaskMessage>,
    enforcer: CompletionEnforcer,
    start_tool_called: bool,
    cancel: Option<CancellationToken>,
    final_status: Option<TaskStatus>,
}

/// What a single pass over the model stream observed.
#[derive(Debug)]
struct StreamSummary {
    reason: StopReason,
    parts: u64,
    produced_text: bool,
    tool_calls: u32,
}

/// The agent adapter.
pub struct AgentAdapter {
    models: Arc<dyn ModelFactory>,
    resolver: Arc<dyn AgentConfigResolver>,
    gateway: ToolGateway,
    hooks: Arc<dyn TaskHooks>,
    settings: AgentSettings,
    events: EventBus,
    state: Mutex<TaskState>,
    connections: tokio::sync::Mutex<ConnectionSet>,
    /// Serializes `start_task` calls on this instance
    run_lock: tokio::sync::Mutex<()>,
    completed: AtomicBool,
    disposed: AtomicBool,
}

impl AgentAdapter {
    /// Create an adapter that resolves models through `models` and per-task
    /// configuration through `resolver`.
    pub fn new(models: Arc<dyn ModelFactory>, resolver: Arc<dyn AgentConfigResolver>) -> Self {
        let settings = AgentSettings::default();
        Self {
            models,
            resolver,
            gateway: ToolGateway::new(),
            hooks: Arc::new(NoHooks),
            events: EventBus::new(),
            state: Mutex::new(TaskState {
                task_id: None,
                session_id: None,
                messages: Vec::new(),
                enforcer: CompletionEnforcer::new(settings.max_continuations),
                start_tool_called: false,
                cancel: None,
                final_status: None,
            }),
            settings,
            connections: tokio::sync::Mutex::new(ConnectionSet::new()),
            run_lock: tokio::sync::Mutex::new(()),
            completed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn with_gateway(mut self, gateway: ToolGateway) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn TaskHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.lock_state().enforcer = CompletionEnforcer::new(settings.max_continuations);
        self.settings = settings;
        self
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_state().session_id.clone()
    }

    pub fn task_id(&self) -> Option<String> {
        self.lock_state().task_id.clone()
    }

    /// A task has started and not yet reached its terminal event.
    pub fn is_running(&self) -> bool {
        !self.completed.load(Ordering::SeqCst) && self.lock_state().cancel.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Messages of the current (or last) task, in creation order.
    pub fn messages(&self) -> Vec<TaskMessage> {
        self.lock_state().messages.clone()
    }

    /// The plan tracked for the current (or last) task.
    pub fn todos(&self) -> Vec<TodoItem> {
        self.lock_state().enforcer.todos().to_vec()
    }

    /// Run a task to its terminal event.
    ///
    /// Task failures are reported as `error` + `complete(error)` events and
    /// the returned [`Task`] carries the terminal status; only calling this
    /// after [`dispose`](Self::dispose) returns `Err`.
    pub async fn start_task(&self, config: TaskConfig) -> Result<Task, AgentError> {
        if self.is_disposed() {
            return Err(AgentError::Disposed);
        }
        let _running = self.run_lock.lock().await;
        if self.is_disposed() {
            return Err(AgentError::Disposed);
        }

        let task_id = config.task_id.clone().unwrap_or_else(new_task_id);
        let session_id = config.session_id.clone().unwrap_or_else(new_session_id);
        let cancel = CancellationToken::new();
        let created_at = Utc::now();

        {
            let mut state = self.lock_state();
            state.task_id = Some(task_id.clone());
            state.session_id = Some(session_id.clone());
            state.messages.clear();
            state.enforcer.begin();
            state.start_tool_called = false;
            state.cancel = Some(cancel.clone());
            state.final_status = None;
            // `dispose` reads the token under this lock after flagging, so a
            // dispose that missed the token is seen here.
            if self.is_disposed() {
                state.cancel = None;
                return Err(AgentError::Disposed);
            }
        }
        self.completed.store(false, Ordering::SeqCst);

        info!(task_id = %task_id, session_id = %session_id, "Starting task");

        let mut ctx = TaskContext {
            task_id: task_id.clone(),
            session_id: session_id.clone(),
            prompt: config.prompt.clone(),
            model_id: config.model_id.clone(),
            ..TaskContext::default()
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = self.execute(&mut ctx, &cancel) => result,
        };

        match outcome {
            Ok(()) => {}
            Err(AgentError::Cancelled) => {
                info!(task_id = %task_id, "Task cancelled");
                self.finish(TaskResult::interrupted(Some(session_id.clone())));
            }
            Err(e) => {
                if self.completed.load(Ordering::SeqCst) {
                    warn!(task_id = %task_id, error = %e, "Error after task completed");
                } else {
                    error!(task_id = %task_id, error = %e, "Task failed");
                    self.events.publish(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    self.finish(TaskResult::error(Some(session_id.clone()), e.to_string()));
                }
            }
        }

        self.close_connections().await;

        let state = self.lock_state();
        Ok(Task {
            id: task_id,
            prompt: config.prompt,
            session_id,
            status: state.final_status.unwrap_or(TaskStatus::Running),
            messages: state.messages.clone(),
            created_at,
            started_at: created_at,
        })
    }

    /// Start a task that continues `session_id`.
    pub async fn resume_session(
        &self,
        session_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<Task, AgentError> {
        self.start_task(TaskConfig::new(prompt).with_session(session_id))
            .await
    }

    /// Abort the running task; emits `complete(interrupted)` unless the task
    /// already reached its terminal event.
    pub fn cancel_task(&self) {
        let (token, session_id) = {
            let state = self.lock_state();
            (state.cancel.clone(), state.session_id.clone())
        };
        let Some(token) = token else {
            return;
        };
        token.cancel();
        self.finish(TaskResult::interrupted(session_id));
    }

    pub fn interrupt_task(&self) {
        self.cancel_task();
    }

    /// Out-of-band responses (permissions, questions) are handled by the host.
    pub async fn send_response(&self, _response: &str) -> Result<(), AgentError> {
        debug!("send_response ignored by the agent adapter");
        Ok(())
    }

    /// Abort any running task, close tool connections and detach subscribers.
    ///
    /// Idempotent; `start_task` fails with [`AgentError::Disposed`] afterwards.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = self.lock_state().cancel.clone();
        if let Some(token) = token {
            token.cancel();
        }
        self.close_connections().await;
        self.events.close();
        info!("Agent adapter disposed");
    }

    async fn execute(&self, ctx: &mut TaskContext, cancel: &CancellationToken) -> Result<(), AgentError> {
        run_pre_start(self.hooks.as_ref(), ctx).await?;

        let config = self.resolver.resolve(ctx).await?;
        let model = self.create_model(&config)?;

        let display_name = ctx
            .model_id
            .as_deref()
            .and_then(|id| self.hooks.model_display_name(id))
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        self.events.publish(AgentEvent::Progress {
            stage: ProgressStage::Loading,
            message: Some(format!("Connecting to {display_name}...")),
            model_name: Some(display_name.clone()),
        });

        let tools = self.connect_tools(&config.mcp_servers).await?;

        self.events.publish(AgentEvent::Progress {
            stage: ProgressStage::Connecting,
            message: Some(format!("Running with {display_name}...")),
            model_name: Some(display_name),
        });

        if self.settings.direct_bypass
            && let Some(search) = DirectSearch::detect(&ctx.prompt, &tools)
            && self.run_direct_search(&search, &tools).await
        {
            return Ok(());
        }

        self.run_until_complete(ctx, config, model, tools, cancel).await
    }

    /// Stream the model, then act on the enforcer's verdict, continuing with
    /// a nudge while the enforcer asks for it.
    async fn run_until_complete(
        &self,
        ctx: &mut TaskContext,
        mut config: AgentConfig,
        mut model: Arc<dyn LanguageModel>,
        mut tools: Arc<ToolSet>,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let mut prompt = ctx.prompt.clone();

        loop {
            let summary = self
                .run_agent_loop(&config, model.as_ref(), tools.clone(), &prompt, cancel)
                .await?;
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let verdict = self.lock_state().enforcer.handle_step_finish(summary.reason);
            debug!(?summary, ?verdict, "Agent loop pass finished");

            let nudge = match verdict {
                Verdict::Complete | Verdict::Continue => {
                    self.finish(TaskResult::success(Some(ctx.session_id.clone())));
                    return Ok(());
                }
                Verdict::Pending => {
                    let action = self.lock_state().enforcer.handle_process_exit(0);
                    match action {
                        ExitAction::ForceComplete => {
                            self.finish(TaskResult::success(Some(ctx.session_id.clone())));
                            return Ok(());
                        }
                        ExitAction::Continue(nudge) => nudge,
                    }
                }
            };

            self.events.publish(AgentEvent::debug(
                "continuation",
                "Model stopped before completing its plan; continuing",
            ));
            info!(task_id = %ctx.task_id, "Driving continuation");

            ctx.prompt = nudge.clone();
            ctx.continuation = true;
            config = self.resolver.resolve(ctx).await?;
            model = self.create_model(&config)?;
            self.close_connections().await;
            tools = self.connect_tools(&config.mcp_servers).await?;
            prompt = nudge;
        }
    }

    /// One pass over the model's event stream.
    async fn run_agent_loop(
        &self,
        config: &AgentConfig,
        model: &dyn LanguageModel,
        tools: Arc<ToolSet>,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary, AgentError> {
        let start_tool = policy::find_start_tool(&tools).map(str::to_string);
        let tool_choice = ToolChoice::select(
            !tools.is_empty(),
            start_tool.as_deref(),
            model.rejects_required_tool_choice(),
        );
        self.events.publish(AgentEvent::debug(
            "stream",
            format!(
                "toolChoice: {}, toolCount: {}",
                tool_choice_label(&tool_choice),
                tools.len()
            ),
        ));

        let request = StreamRequest {
            system_prompt: config.system_prompt.clone(),
            prompt: prompt.to_string(),
            tool_choice,
            max_steps: self.settings.max_steps,
            max_tokens: Some(self.settings.max_tokens),
        };
        let mut stream = model.stream(request, tools.clone(), cancel.clone()).await?;

        let mut turn = TurnAccumulator::new(Duration::from_millis(self.settings.stream_throttle_ms));
        let mut last_reason = FinishReason::Stop;
        let mut parts: u64 = 0;
        let mut produced_text = false;
        let mut tool_calls: u32 = 0;

        while let Some(event) = stream.next().await {
            let event = event?;
            parts += 1;
            if parts <= 3 || parts % 20 == 0 {
                self.publish_part_debug(parts, &event);
            }

            match event {
                StepEvent::TextDelta { text } => {
                    if text.is_empty() {
                        continue;
                    }
                    produced_text = true;
                    if let Some(message) = turn.push(&text, Instant::now()) {
                        self.emit_message(message);
                    }
                }
                StepEvent::ReasoningDelta { text } => {
                    if !text.is_empty() {
                        self.events.publish(AgentEvent::Reasoning { text });
                    }
                }
                StepEvent::ToolCall { name, args, .. } => {
                    tool_calls += 1;
                    if let Some(message) = turn.break_turn() {
                        self.emit_message(message);
                    }
                    self.handle_tool_call(&name, &args);
                }
                StepEvent::ToolResult {
                    name, args, result, ..
                } => {
                    self.handle_tool_result(&name, args, display_tool_output(&result));
                }
                StepEvent::StepFinish { reason } => {
                    if let Some(message) = turn.end_turn() {
                        self.emit_message(message);
                    }
                    self.lock_state().enforcer.observe_step_boundary();
                    self.events.publish(AgentEvent::StepFinish {
                        reason: StopReason::from(&reason),
                    });
                    last_reason = reason;
                }
                StepEvent::Finish { reason } => {
                    if let Some(message) = turn.end_turn() {
                        self.emit_message(message);
                    }
                    last_reason = reason;
                }
            }
        }

        if let Some(message) = turn.end_turn() {
            self.emit_message(message);
        }

        let summary = StreamSummary {
            reason: StopReason::from(&last_reason),
            parts,
            produced_text,
            tool_calls,
        };
        info!(
            parts = summary.parts,
            finish_reason = %summary.reason,
            produced_text = summary.produced_text,
            tool_calls = summary.tool_calls,
            "Stream ended"
        );

        if !cancel.is_cancelled() && !produced_text && tool_calls == 0 && !tools.is_empty() {
            self.emit_message(TaskMessage::assistant(EMPTY_OUTPUT_MESSAGE));
        }

        Ok(summary)
    }

    fn handle_tool_call(&self, name: &str, input: &serde_json::Value) {
        let mut events = Vec::new();
        {
            let mut state = self.lock_state();

            if policy::is_start_tool(name) {
                state.start_tool_called = true;
                if let Some(todos) = policy::declared_plan(input) {
                    state.enforcer.mark_task_requires_completion();
                    state.enforcer.update_todos(todos.clone());
                    events.push(AgentEvent::TodoUpdate { todos });
                }
            }

            if !state.start_tool_called && !policy::is_exempt_before_start(name) {
                events.push(AgentEvent::debug(
                    "warning",
                    format!("Tool \"{name}\" called before start_task"),
                ));
            }

            state
                .enforcer
                .mark_tools_used(!policy::is_non_task_tool(name));

            if policy::is_complete_tool(name) {
                state.enforcer.handle_complete_task_detection(input);
            }

            if policy::is_todo_write(name) {
                let updates = policy::todo_write_items(input);
                if !updates.is_empty() {
                    state.enforcer.merge_todos(updates);
                    events.push(AgentEvent::TodoUpdate {
                        todos: state.enforcer.todos().to_vec(),
                    });
                }
            }
        }

        events.push(AgentEvent::ToolUse {
            name: name.to_string(),
            input: input.clone(),
        });
        events.push(AgentEvent::progress(
            ProgressStage::ToolUse,
            format!("Using {name}"),
        ));
        for event in events {
            self.events.publish(event);
        }
    }

    fn handle_tool_result(&self, name: &str, input: serde_json::Value, output: String) {
        let session_id = self.session_id();
        self.events.publish(AgentEvent::ToolResult {
            output: output.clone(),
        });
        self.events.publish(AgentEvent::ToolCallComplete {
            tool_name: name.to_string(),
            tool_input: input,
            tool_output: output,
            session_id,
        });
    }

    /// Returns `true` when the search answered the task.
    async fn run_direct_search(&self, search: &DirectSearch, tools: &ToolSet) -> bool {
        self.events.publish(AgentEvent::progress(
            ProgressStage::ToolUse,
            "Searching hackathons...",
        ));
        match search.run(tools).await {
            Ok(text) => {
                let display = sanitize_for_display(&text);
                let content = if display.is_empty() { text } else { display };
                info!(query = %search.query, "Answered by direct search");
                self.emit_message(TaskMessage::assistant(content));
                self.finish(TaskResult::success(self.session_id()));
                true
            }
            Err(e) => {
                warn!(error = %e, "Direct hackathon search failed, falling back to the agent loop");
                false
            }
        }
    }

    fn create_model(&self, config: &AgentConfig) -> Result<Arc<dyn LanguageModel>, AgentError> {
        self.models
            .create_model(&config.model_spec())
            .ok_or_else(|| AgentError::UnsupportedProvider {
                provider: config.provider.clone(),
            })
    }

    /// Connect `specs` straight into the adapter's connection set, so every
    /// opened connection is closed later even if connecting fails or is
    /// cancelled half way.
    async fn connect_tools(&self, specs: &[McpServerSpec]) -> Result<Arc<ToolSet>, AgentError> {
        let mut connections = self.connections.lock().await;
        let tools = self.gateway.connect(specs, &mut connections).await?;
        debug!(tools = ?tools.names(), "Tool set ready");
        Ok(Arc::new(tools))
    }

    async fn close_connections(&self) {
        let failures = self.connections.lock().await.close_all().await;
        if !failures.is_empty() {
            debug!(failures = failures.len(), "Some tool servers failed to close");
        }
    }

    fn emit_message(&self, message: TaskMessage) {
        upsert(&mut self.lock_state().messages, message.clone());
        self.events.publish(AgentEvent::Message { message });
    }

    fn publish_part_debug(&self, part: u64, event: &StepEvent) {
        let (has_text, tool_name) = match event {
            StepEvent::TextDelta { text } | StepEvent::ReasoningDelta { text } => {
                (!text.is_empty(), None)
            }
            StepEvent::ToolCall { name, .. } | StepEvent::ToolResult { name, .. } => {
                (false, Some(name.as_str()))
            }
            _ => (false, None),
        };
        self.events.publish(AgentEvent::Debug {
            kind: "stream".into(),
            message: format!("Part #{part}: {}", event.kind()),
            data: Some(json!({
                "type": event.kind(),
                "hasText": has_text,
                "toolName": tool_name,
            })),
        });
    }

    /// Publish the terminal event unless one was already published.
    fn finish(&self, result: TaskResult) -> bool {
        if self.completed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.lock_state().final_status = Some(result.status);
        info!(status = ?result.status, "Task complete");
        self.events.publish(AgentEvent::Complete { result });
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for AgentAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentAdapter")
            .field("task_id", &self.task_id())
            .field("running", &self.is_running())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn tool_choice_label(choice: &ToolChoice) -> String {
    match choice {
        ToolChoice::Auto => "auto".into(),
        ToolChoice::Required => "required".into(),
        ToolChoice::Tool { name } => format!("tool:{name}"),
    }
}
