//! Agent event surface: what the adapter reports to its caller.
//!
//! Every event name the caller can observe is one [`AgentEvent`] variant, so
//! consumers match exhaustively instead of on strings. Delivery goes through
//! an [`EventBus`]: each subscriber gets its own unbounded queue, so a slow
//! consumer never loses the terminal `complete` event.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::message::TaskMessage;
use crate::provider::StopReason;
use crate::task::{TaskResult, TodoItem};

/// Coarse progress stages reported while a task starts up and runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStage {
    Loading,
    Connecting,
    ToolUse,
    DirectChat,
}

/// All events the agent adapter emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentEvent {
    /// A new or revised assistant message (revisions reuse the id)
    Message { message: TaskMessage },

    /// The model invoked a tool
    ToolUse {
        name: String,
        input: serde_json::Value,
    },

    /// A tool returned (display string)
    ToolResult { output: String },

    /// Tool call bookkeeping with input and output together
    ToolCallComplete {
        tool_name: String,
        tool_input: serde_json::Value,
        tool_output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    Progress {
        stage: ProgressStage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_name: Option<String>,
    },

    /// Diagnostics; never affects the task outcome
    Debug {
        kind: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },

    /// The tracked plan changed
    #[serde(rename = "todo:update")]
    TodoUpdate { todos: Vec<TodoItem> },

    Reasoning { text: String },

    StepFinish { reason: StopReason },

    /// Terminal event, emitted exactly once per task
    Complete { result: TaskResult },

    Error { message: String },
}

impl AgentEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::ToolUse { .. } => "tool-use",
            Self::ToolResult { .. } => "tool-result",
            Self::ToolCallComplete { .. } => "tool-call-complete",
            Self::Progress { .. } => "progress",
            Self::Debug { .. } => "debug",
            Self::TodoUpdate { .. } => "todo:update",
            Self::Reasoning { .. } => "reasoning",
            Self::StepFinish { .. } => "step-finish",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn progress(stage: ProgressStage, message: impl Into<String>) -> Self {
        Self::Progress {
            stage,
            message: Some(message.into()),
            model_name: None,
        }
    }

    pub fn debug(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Debug {
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Fan-out bus for agent events.
///
/// Unlike a broadcast channel, every subscriber queue is unbounded and
/// lossless. Subscribers whose receiver was dropped are pruned on publish.
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Arc<AgentEvent>>>>,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        let event = Arc::new(event);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(Arc::clone(&event)).is_ok());
    }

    /// Subscribe to receive every event published from now on.
    ///
    /// After [`EventBus::close`] the returned receiver is already finished.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if !self.closed.load(Ordering::SeqCst) {
            subscribers.push(tx);
        }
        EventReceiver { rx }
    }

    /// Detach every subscriber; their receivers end after draining.
    pub fn close(&self) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        self.closed.store(true, Ordering::SeqCst);
        subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of an [`EventBus`] subscription.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Arc<AgentEvent>>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once the bus is closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<AgentEvent>> {
        self.rx.recv().await
    }

    /// Take every event that is already queued.
    pub fn drain(&mut self) -> Vec<Arc<AgentEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
