//! Tool-call policy: which tool names mean what to the agent loop.
//!
//! Tool servers may be prefixed on collision, so every well-known name
//! matches both bare (`start_task`) and suffixed (`planner_start_task`).

use autopilot_core::task::{TodoItem, TodoPriority, TodoStatus};
use autopilot_core::tool::ToolSet;
use serde::Deserialize;
use uuid::Uuid;

pub const START_TASK: &str = "start_task";
pub const COMPLETE_TASK: &str = "complete_task";
pub const TODO_WRITE: &str = "todowrite";

/// Tools that never count as progress on the task itself.
const NON_TASK_TOOLS: &[&str] = &[
    "skill",
    START_TASK,
    "discard",
    TODO_WRITE,
    COMPLETE_TASK,
    "AskUserQuestion",
    "report_checkpoint",
    "report_thought",
    "request_file_permission",
];

/// `name` is `base` or ends in `_base`.
fn matches_tool(name: &str, base: &str) -> bool {
    name == base
        || name
            .strip_suffix(base)
            .is_some_and(|prefix| prefix.ends_with('_'))
}

pub fn is_start_tool(name: &str) -> bool {
    matches_tool(name, START_TASK)
}

pub fn is_complete_tool(name: &str) -> bool {
    matches_tool(name, COMPLETE_TASK)
}

pub fn is_todo_write(name: &str) -> bool {
    matches_tool(name, TODO_WRITE)
}

/// Tools that may be called before `start_task` without a warning.
pub fn is_exempt_before_start(name: &str) -> bool {
    is_start_tool(name) || is_todo_write(name)
}

/// Planning, help and reporting tools; everything else is substantive.
pub fn is_non_task_tool(name: &str) -> bool {
    NON_TASK_TOOLS.iter().any(|base| matches_tool(name, base))
}

/// First key in `tools` that names a start tool.
pub fn find_start_tool(tools: &ToolSet) -> Option<&str> {
    tools.names().into_iter().find(|name| is_start_tool(name))
}

#[derive(Debug, Deserialize)]
struct StartTaskInput {
    #[serde(default)]
    needs_planning: bool,
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    steps: Option<Vec<String>>,
}

/// The plan declared by a `start_task` call, if it declares one.
///
/// A plan needs `needs_planning: true`, a goal and a step list (which may
/// be empty).
pub fn declared_plan(input: &serde_json::Value) -> Option<Vec<TodoItem>> {
    let input: StartTaskInput = serde_json::from_value(input.clone()).ok()?;
    let has_goal = input.goal.as_deref().is_some_and(|g| !g.trim().is_empty());
    if !input.needs_planning || !has_goal {
        return None;
    }
    input.steps.map(|steps| TodoItem::plan(&steps))
}

#[derive(Debug, Deserialize)]
struct TodoWriteItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    status: Option<TodoStatus>,
    #[serde(default)]
    priority: Option<TodoPriority>,
}

#[derive(Debug, Deserialize)]
struct TodoWriteInput {
    #[serde(default)]
    todos: Vec<TodoWriteItem>,
}

/// Todo items carried by a `todowrite` call.
///
/// Items without an id get a fresh one; status defaults to pending and
/// priority to medium. A malformed payload yields no items.
pub fn todo_write_items(input: &serde_json::Value) -> Vec<TodoItem> {
    let Ok(input) = serde_json::from_value::<TodoWriteInput>(input.clone()) else {
        return Vec::new();
    };
    input
        .todos
        .into_iter()
        .map(|item| TodoItem {
            id: item
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            content: item.content,
            status: item.status.unwrap_or_default(),
            priority: item.priority.unwrap_or_default(),
        })
        .collect()
}
