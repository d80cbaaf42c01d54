//! Turn accumulator: folds text fragments into in-place message updates.
//!
//! One accumulator is live per streamed turn. The first visible fragment
//! creates a message id and is emitted at once; later fragments re-emit the
//! same id at most once per throttle interval. `flush` and `end_turn`
//! always emit the pending state so the final revision is never lost.

use std::time::{Duration, Instant};

use autopilot_core::display::sanitize_for_display;
use autopilot_core::message::{TaskMessage, new_message_id};

#[derive(Debug)]
pub struct TurnAccumulator {
    throttle: Duration,
    message_id: Option<String>,
    text: String,
    last_emit: Option<Instant>,
    /// Content changed since the last emitted revision
    dirty: bool,
}

impl TurnAccumulator {
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            message_id: None,
            text: String::new(),
            last_emit: None,
            dirty: false,
        }
    }

    /// Id of the message being revised, if the turn has produced one.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Add a fragment; returns a revision when one is due.
    pub fn push(&mut self, fragment: &str, now: Instant) -> Option<TaskMessage> {
        self.text.push_str(fragment);
        let display = sanitize_for_display(&self.text);
        if display.is_empty() {
            return None;
        }

        let first = self.message_id.is_none();
        let due = self
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.throttle);
        let id = self.message_id.get_or_insert_with(new_message_id).clone();

        if first || due {
            self.last_emit = Some(now);
            self.dirty = false;
            Some(TaskMessage::assistant_with_id(id, display))
        } else {
            self.dirty = true;
            None
        }
    }

    /// Emit the latest content if a throttled revision is pending.
    pub fn flush(&mut self) -> Option<TaskMessage> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let id = self.message_id.clone()?;
        Some(TaskMessage::assistant_with_id(id, sanitize_for_display(&self.text)))
    }

    /// Close the turn: emit the final revision and start over with a new id.
    ///
    /// The final revision is emitted even when it was already sent, so the
    /// caller always sees the turn's complete text at the boundary.
    pub fn end_turn(&mut self) -> Option<TaskMessage> {
        let final_revision = self.message_id.take().map(|id| {
            TaskMessage::assistant_with_id(id, sanitize_for_display(&self.text))
        });
        self.text.clear();
        self.last_emit = None;
        self.dirty = false;
        final_revision
    }

    /// A tool call interrupts the text: flush what is pending and start a new message.
    pub fn break_turn(&mut self) -> Option<TaskMessage> {
        let pending = self.flush();
        self.message_id = None;
        self.text.clear();
        self.last_emit = None;
        pending
    }
}
