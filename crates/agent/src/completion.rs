//! Completion enforcer: decides when a task is really done.
//!
//! Small models often stop talking without calling `complete_task`, even
//! after declaring a multi-step plan. The enforcer is a state machine fed by
//! four inputs (plan declared, tool used, completion signalled, step
//! finished) and is the only thing that decides the terminal outcome.
//!
//! ```text
//!   Idle ──begin──▶ Active ──plan──▶ PlanActive
//!                     │                  │
//!                     │ stop             │ stop, no substantive tool in last step
//!                     ▼                  ▼
//!                  Complete ◀──exit── AwaitingContinuation
//!                     ▲        (budget spent)   │
//!                     │                         │ continue (nudge)
//!   CompletionSignalled ──step finish──┘        ▼
//!                                          PlanActive
//! ```

use autopilot_core::provider::StopReason;
use autopilot_core::task::TodoItem;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// Reset, no task running
    Idle,
    /// Running without a declared plan
    Active,
    /// A multi-step plan was declared; the model must call the completion tool
    PlanActive,
    /// The completion tool was called
    CompletionSignalled,
    /// The model stopped early and a continuation may be driven
    AwaitingContinuation,
    Complete,
}

/// What the loop should do after a model step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The task is done
    Complete,
    /// The model is still working
    Continue,
    /// The model stopped before finishing its plan
    Pending,
}

/// What to do once a `Pending` run has exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitAction {
    /// Re-prompt the model with this nudge
    Continue(String),
    /// Give up nudging and complete the task
    ForceComplete,
}

#[derive(Debug, Clone)]
pub struct CompletionEnforcer {
    state: CompletionState,
    todos: Vec<TodoItem>,
    /// Substantive tool calls since the last step boundary
    tools_since_step: u32,
    /// Substantive tool calls over the whole task
    tools_total: u32,
    continuations_used: u32,
    max_continuations: u32,
    completion_input: Option<serde_json::Value>,
}

impl CompletionEnforcer {
    pub fn new(max_continuations: u32) -> Self {
        Self {
            state: CompletionState::Idle,
            todos: Vec::new(),
            tools_since_step: 0,
            tools_total: 0,
            continuations_used: 0,
            max_continuations,
            completion_input: None,
        }
    }

    /// Drop all per-task state.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_continuations);
    }

    /// Start tracking a new task.
    pub fn begin(&mut self) {
        self.reset();
        self.state = CompletionState::Active;
    }

    pub fn state(&self) -> CompletionState {
        self.state
    }

    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    pub fn requires_completion(&self) -> bool {
        matches!(
            self.state,
            CompletionState::PlanActive | CompletionState::AwaitingContinuation
        )
    }

    pub fn substantive_tool_calls(&self) -> u32 {
        self.tools_total
    }

    pub fn continuations_used(&self) -> u32 {
        self.continuations_used
    }

    /// The model declared a multi-step plan; stopping no longer means done.
    pub fn mark_task_requires_completion(&mut self) {
        if matches!(self.state, CompletionState::Idle | CompletionState::Active) {
            self.transition(CompletionState::PlanActive);
        }
    }

    /// Replace the tracked plan.
    pub fn update_todos(&mut self, todos: Vec<TodoItem>) {
        self.todos = todos;
    }

    /// Merge plan updates by id; unknown ids are appended, nothing is removed.
    pub fn merge_todos(&mut self, updates: Vec<TodoItem>) {
        for update in updates {
            match self.todos.iter_mut().find(|t| t.id == update.id) {
                Some(existing) => *existing = update,
                None => self.todos.push(update),
            }
        }
    }

    /// Record a tool invocation; only substantive ones count.
    pub fn mark_tools_used(&mut self, substantive: bool) {
        if substantive {
            self.tools_since_step += 1;
            self.tools_total += 1;
        }
    }

    /// The completion tool was called with `input`.
    pub fn handle_complete_task_detection(&mut self, input: &serde_json::Value) {
        if self.state == CompletionState::Complete {
            return;
        }
        self.completion_input = Some(input.clone());
        self.transition(CompletionState::CompletionSignalled);
    }

    pub fn completion_input(&self) -> Option<&serde_json::Value> {
        self.completion_input.as_ref()
    }

    /// A model step ended inside a stream.
    pub fn observe_step_boundary(&mut self) {
        self.tools_since_step = 0;
    }

    /// Decide the outcome after a run ended with `reason`.
    pub fn handle_step_finish(&mut self, reason: StopReason) -> Verdict {
        let stopped = reason != StopReason::ToolUse;
        let verdict = match self.state {
            CompletionState::CompletionSignalled | CompletionState::Complete => {
                self.transition(CompletionState::Complete);
                Verdict::Complete
            }
            CompletionState::Idle | CompletionState::Active => {
                if stopped {
                    self.transition(CompletionState::Complete);
                    Verdict::Complete
                } else {
                    Verdict::Continue
                }
            }
            CompletionState::PlanActive | CompletionState::AwaitingContinuation => {
                if stopped && self.tools_since_step == 0 {
                    self.transition(CompletionState::AwaitingContinuation);
                    Verdict::Pending
                } else {
                    Verdict::Continue
                }
            }
        };
        debug!(reason = %reason, ?verdict, state = ?self.state, "Step finish evaluated");
        verdict
    }

    /// A pending run exited; nudge again while budget remains, else finish.
    pub fn handle_process_exit(&mut self, code: i32) -> ExitAction {
        if self.state == CompletionState::AwaitingContinuation
            && self.continuations_used < self.max_continuations
        {
            self.continuations_used += 1;
            self.tools_since_step = 0;
            self.transition(CompletionState::PlanActive);
            return ExitAction::Continue(self.continuation_prompt());
        }
        debug!(code, continuations = self.continuations_used, "Forcing completion");
        self.transition(CompletionState::Complete);
        ExitAction::ForceComplete
    }

    /// Nudge prompt listing the plan items still open.
    pub fn continuation_prompt(&self) -> String {
        let open: Vec<&TodoItem> = self.todos.iter().filter(|t| t.is_open()).collect();
        let mut prompt = String::from("Continue working on the task.");
        if !open.is_empty() {
            prompt.push_str(" Remaining steps:\n");
            for todo in open {
                prompt.push_str(&format!("- {}\n", todo.content));
            }
        } else {
            prompt.push('\n');
        }
        prompt.push_str("When everything is done, call the complete_task tool.");
        prompt
    }

    fn transition(&mut self, next: CompletionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Completion state change");
            self.state = next;
        }
    }
}

impl Default for CompletionEnforcer {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CompletionState::*;
    use serde_json::json;

    fn in_state(state: CompletionState) -> CompletionEnforcer {
        let mut enforcer = CompletionEnforcer::new(1);
        enforcer.state = state;
        enforcer
    }

    #[test]
    fn step_finish_transition_table() {
        // (state, reason, substantive tool in last step, verdict, next state)
        let table = [
            (Active, StopReason::Stop, false, Verdict::Complete, Complete),
            (Active, StopReason::EndTurn, false, Verdict::Complete, Complete),
            (Active, StopReason::ToolUse, true, Verdict::Continue, Active),
            (PlanActive, StopReason::Stop, false, Verdict::Pending, AwaitingContinuation),
            (PlanActive, StopReason::EndTurn, false, Verdict::Pending, AwaitingContinuation),
            (PlanActive, StopReason::Stop, true, Verdict::Continue, PlanActive),
            (PlanActive, StopReason::ToolUse, false, Verdict::Continue, PlanActive),
            (CompletionSignalled, StopReason::Stop, false, Verdict::Complete, Complete),
            (CompletionSignalled, StopReason::ToolUse, true, Verdict::Complete, Complete),
            (AwaitingContinuation, StopReason::Stop, false, Verdict::Pending, AwaitingContinuation),
            (Complete, StopReason::Stop, false, Verdict::Complete, Complete),
        ];

        for (state, reason, used, verdict, next) in table {
            let mut enforcer = in_state(state);
            enforcer.mark_tools_used(used);
            assert_eq!(
                enforcer.handle_step_finish(reason),
                verdict,
                "{state:?} + {reason}"
            );
            assert_eq!(enforcer.state(), next, "{state:?} + {reason}");
        }
    }

    #[test]
    fn no_plan_completes_on_stop() {
        let mut enforcer = CompletionEnforcer::default();
        enforcer.begin();
        enforcer.mark_tools_used(true);
        enforcer.observe_step_boundary();
        assert_eq!(enforcer.handle_step_finish(StopReason::Stop), Verdict::Complete);
    }

    #[test]
    fn plan_then_stop_gets_one_continuation_then_forced() {
        let mut enforcer = CompletionEnforcer::new(1);
        enforcer.begin();
        enforcer.mark_task_requires_completion();
        enforcer.update_todos(TodoItem::plan(&["a", "b"]));
        enforcer.mark_tools_used(true);
        enforcer.observe_step_boundary();

        assert_eq!(enforcer.handle_step_finish(StopReason::Stop), Verdict::Pending);
        match enforcer.handle_process_exit(0) {
            ExitAction::Continue(nudge) => {
                assert!(nudge.contains("- a"));
                assert!(nudge.contains("complete_task"));
            }
            other => panic!("Expected a continuation, got {other:?}"),
        }
        assert_eq!(enforcer.state(), PlanActive);

        assert_eq!(enforcer.handle_step_finish(StopReason::Stop), Verdict::Pending);
        assert_eq!(enforcer.handle_process_exit(0), ExitAction::ForceComplete);
        assert_eq!(enforcer.state(), Complete);
        assert_eq!(enforcer.continuations_used(), 1);
    }

    #[test]
    fn zero_budget_forces_immediately() {
        let mut enforcer = CompletionEnforcer::new(0);
        enforcer.begin();
        enforcer.mark_task_requires_completion();
        assert_eq!(enforcer.handle_step_finish(StopReason::Stop), Verdict::Pending);
        assert_eq!(enforcer.handle_process_exit(0), ExitAction::ForceComplete);
    }

    #[test]
    fn completion_signal_wins_over_plan() {
        let mut enforcer = CompletionEnforcer::default();
        enforcer.begin();
        enforcer.mark_task_requires_completion();
        enforcer.handle_complete_task_detection(&json!({"summary": "done"}));
        assert_eq!(enforcer.state(), CompletionSignalled);
        assert_eq!(enforcer.completion_input(), Some(&json!({"summary": "done"})));

        // A late plan declaration does not reopen the task
        enforcer.mark_task_requires_completion();
        assert_eq!(enforcer.handle_step_finish(StopReason::Stop), Verdict::Complete);
    }

    #[test]
    fn non_substantive_tools_do_not_count() {
        let mut enforcer = CompletionEnforcer::default();
        enforcer.begin();
        enforcer.mark_task_requires_completion();
        enforcer.mark_tools_used(false);
        assert_eq!(enforcer.substantive_tool_calls(), 0);
        assert_eq!(enforcer.handle_step_finish(StopReason::Stop), Verdict::Pending);
    }

    #[test]
    fn merge_todos_updates_by_id_and_appends() {
        let mut enforcer = CompletionEnforcer::default();
        enforcer.update_todos(TodoItem::plan(&["a", "b"]));
        let mut done = enforcer.todos()[0].clone();
        done.status = autopilot_core::task::TodoStatus::Done;
        let extra = TodoItem {
            id: "9".into(),
            ..done.clone()
        };
        enforcer.merge_todos(vec![done, extra]);

        assert_eq!(enforcer.todos().len(), 3);
        assert!(!enforcer.todos()[0].is_open());
        assert!(enforcer.continuation_prompt().contains("- b"));
    }

    #[test]
    fn reset_keeps_budget_only() {
        let mut enforcer = CompletionEnforcer::new(2);
        enforcer.begin();
        enforcer.mark_task_requires_completion();
        enforcer.update_todos(TodoItem::plan(&["a"]));
        enforcer.reset();
        assert_eq!(enforcer.state(), Idle);
        assert!(enforcer.todos().is_empty());
        assert!(!enforcer.requires_completion());
        assert_eq!(enforcer.max_continuations, 2);
    }
}
