//! `autopilot run`: Run one agent task and stream its events.

use std::io::Write;
use std::sync::Arc;

use autopilot_agent::{AgentAdapter, ConfigResolver};
use autopilot_config::AppConfig;
use autopilot_core::event::AgentEvent;
use autopilot_core::message::TaskMessage;
use autopilot_core::task::{TaskConfig, TaskStatus, TodoItem, TodoStatus};
use autopilot_providers::{ProviderFactory, is_direct_chat_session};

const MAX_TOOL_OUTPUT_CHARS: usize = 400;

pub async fn run(
    message: String,
    model: Option<String>,
    session: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if resumes_direct_chat(session.as_deref()) {
        return super::chat::run(Some(message), model, session).await;
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let settings = config.agent.clone();

    let adapter = Arc::new(
        AgentAdapter::new(
            Arc::new(ProviderFactory::new()),
            Arc::new(ConfigResolver::new(config)),
        )
        .with_settings(settings),
    );
    let mut events = adapter.subscribe();

    let mut task_config = TaskConfig::new(message);
    task_config.model_id = model;
    if let Some(session) = session {
        task_config = task_config.with_session(session);
    }

    let runner = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.start_task(task_config).await })
    };

    let mut printer = EventPrinter::new(json);
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                printer.print(&event)?;
                if event.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n  Cancelling...");
                adapter.cancel_task();
            }
        }
    }

    let task = runner.await??;
    adapter.dispose().await;

    if !json {
        eprintln!("  Session: {}", task.session_id);
    }
    if task.status == TaskStatus::Error {
        return Err(format!("Task {} failed", task.id).into());
    }
    Ok(())
}

/// Direct chat sessions never ran through the agent, so they continue in direct chat.
fn resumes_direct_chat(session: Option<&str>) -> bool {
    session.is_some_and(is_direct_chat_session)
}

/// Renders events on the terminal, or as JSON lines.
struct EventPrinter {
    json: bool,
    /// Id and text of the message currently being streamed
    current: Option<(String, String)>,
}

impl EventPrinter {
    fn new(json: bool) -> Self {
        Self { json, current: None }
    }

    fn print(&mut self, event: &AgentEvent) -> Result<(), Box<dyn std::error::Error>> {
        if self.json {
            println!("{}", serde_json::to_string(event)?);
            return Ok(());
        }

        match event {
            AgentEvent::Message { message } => {
                let text = self.message_delta(message);
                print!("{text}");
                std::io::stdout().flush()?;
            }
            AgentEvent::ToolUse { name, input } => {
                self.end_message();
                eprintln!("  [tool] {name} {input}");
            }
            AgentEvent::ToolResult { output } => {
                eprintln!("  [result] {}", truncate(output, MAX_TOOL_OUTPUT_CHARS));
            }
            AgentEvent::Progress {
                message: Some(message),
                ..
            } => {
                self.end_message();
                eprintln!("  {message}");
            }
            AgentEvent::TodoUpdate { todos } => {
                self.end_message();
                eprintln!("{}", render_todos(todos));
            }
            AgentEvent::Error { message } => {
                self.end_message();
                eprintln!("  [Error] {message}");
            }
            AgentEvent::Complete { result } => {
                self.end_message();
                eprintln!("  Task finished: {}", status_label(result.status));
            }
            AgentEvent::Debug { kind, message, .. } => {
                tracing::debug!(kind = %kind, "{message}");
            }
            AgentEvent::StepFinish { reason } => {
                tracing::debug!(reason = %reason, "Step finished");
            }
            AgentEvent::Reasoning { text } => {
                tracing::debug!(chars = text.len(), "Reasoning");
            }
            AgentEvent::Progress { .. } | AgentEvent::ToolCallComplete { .. } => {}
        }
        Ok(())
    }

    /// Text to print for a message revision.
    ///
    /// Revisions of the streaming message print only what was appended; a
    /// new message, or a revision that rewrote earlier text, starts a new
    /// line with the full content.
    fn message_delta(&mut self, message: &TaskMessage) -> String {
        let delta = match &self.current {
            Some((id, printed)) if *id == message.id => {
                match message.content.strip_prefix(printed.as_str()) {
                    Some(appended) => appended.to_string(),
                    None => format!("\n{}", message.content),
                }
            }
            Some(_) => format!("\n\n{}", message.content),
            None => message.content.clone(),
        };
        self.current = Some((message.id.clone(), message.content.clone()));
        delta
    }

    fn end_message(&mut self) {
        if self.current.take().is_some() {
            println!();
        }
    }
}

fn render_todos(todos: &[TodoItem]) -> String {
    let mut out = String::from("  Plan:");
    for todo in todos {
        let mark = match todo.status {
            TodoStatus::Done => "x",
            TodoStatus::InProgress => ">",
            TodoStatus::Cancelled => "-",
            TodoStatus::Pending => " ",
        };
        out.push_str(&format!("\n    [{mark}] {}", todo.content));
    }
    out
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Running => "running",
        TaskStatus::Success => "success",
        TaskStatus::Error => "error",
        TaskStatus::Interrupted => "interrupted",
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
