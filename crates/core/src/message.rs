//! Assistant message domain type.
//!
//! A [`TaskMessage`] is what the caller renders. While a turn is streaming the
//! same message id is re-emitted with growing content; once the turn boundary
//! passes the message is final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a task message. Only the assistant is emitted by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Assistant,
}

/// A single message shown to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Stable message id; in-place updates reuse it
    pub id: String,

    /// Always `assistant` for messages produced by the loop
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Sanitized display text
    pub content: String,

    /// When this revision of the message was produced
    pub timestamp: DateTime<Utc>,
}

impl TaskMessage {
    /// Create a new assistant message with a fresh id.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::assistant_with_id(new_message_id(), content)
    }

    /// Create a revision of an assistant message that already has an id.
    pub fn assistant_with_id(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: MessageKind::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Generate a message id.
pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

/// Insert `message` into `messages`, replacing an existing entry with the same id.
///
/// Returns `true` when an existing message was replaced.
pub fn upsert(messages: &mut Vec<TaskMessage>, message: TaskMessage) -> bool {
    match messages.iter_mut().find(|m| m.id == message.id) {
        Some(existing) => {
            *existing = message;
            true
        }
        None => {
            messages.push(message);
            false
        }
    }
}
