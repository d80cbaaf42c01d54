//! Task, task configuration and plan (todo) types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::TaskMessage;

/// Lifecycle status of a task.
///
/// A task leaves `Running` exactly once per `start_task` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Success,
    Error,
    Interrupted,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// What the caller asks the adapter to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// The user prompt
    pub prompt: String,

    /// Explicit task id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Session to continue; a fresh one is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Model id chosen by the caller (used for display names)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl TaskConfig {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// One user-initiated unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub messages: Vec<TaskMessage>,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

/// Payload of the terminal `complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(session_id: Option<String>) -> Self {
        Self {
            status: TaskStatus::Success,
            session_id,
            error: None,
        }
    }

    pub fn interrupted(session_id: Option<String>) -> Self {
        Self {
            status: TaskStatus::Interrupted,
            session_id,
            error: None,
        }
    }

    pub fn error(session_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Error,
            session_id,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    #[serde(alias = "completed")]
    Done,
    #[serde(alias = "canceled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    High,
    #[default]
    Medium,
    Low,
}

/// One step of a plan the model declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
}

impl TodoItem {
    /// Build the initial plan from a list of step descriptions.
    ///
    /// The first step starts `in_progress`, the rest `pending`.
    pub fn plan<S: AsRef<str>>(steps: &[S]) -> Vec<TodoItem> {
        steps
            .iter()
            .enumerate()
            .map(|(i, step)| TodoItem {
                id: (i + 1).to_string(),
                content: step.as_ref().to_string(),
                status: if i == 0 {
                    TodoStatus::InProgress
                } else {
                    TodoStatus::Pending
                },
                priority: TodoPriority::Medium,
            })
            .collect()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, TodoStatus::Pending | TodoStatus::InProgress)
    }
}

/// Generate a task id.
pub fn new_task_id() -> String {
    format!("task_{}", Uuid::new_v4().simple())
}
