//! Per-task context and host hooks.
//!
//! A [`TaskContext`] is created by `start_task` and threaded through the
//! pre-start hook into config resolution, so anything a hook decides for
//! this task travels with it instead of living in shared globals.

use std::collections::HashMap;

use async_trait::async_trait;
use autopilot_core::error::AgentError;

/// Everything known about the task being started.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub task_id: String,
    pub session_id: String,
    pub prompt: String,
    /// Model requested by the caller, if any
    pub model_id: Option<String>,
    /// Values set by hooks for later stages (e.g. `mcp_servers`)
    pub settings: HashMap<String, String>,
    /// Set when this context drives a continuation of the same task
    pub continuation: bool,
}

impl TaskContext {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.insert(key.into(), value.into());
    }
}

/// Host callbacks around task start.
///
/// `warm_up` is side setup (a browser warm-up, say) and `prepare` readies
/// configuration; both run concurrently and both must finish before the
/// model is invoked. A failure from either fails the task.
#[async_trait]
pub trait TaskHooks: Send + Sync {
    async fn warm_up(&self, _ctx: &TaskContext) -> Result<(), AgentError> {
        Ok(())
    }

    async fn prepare(&self, _ctx: &mut TaskContext) -> Result<(), AgentError> {
        Ok(())
    }

    /// Human-readable model name for progress messages.
    fn model_display_name(&self, _model_id: &str) -> Option<String> {
        None
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl TaskHooks for NoHooks {}

/// Run `warm_up` and `prepare` concurrently; the context seen by
/// `warm_up` is a snapshot taken before `prepare` runs.
pub async fn run_pre_start(hooks: &dyn TaskHooks, ctx: &mut TaskContext) -> Result<(), AgentError> {
    let snapshot = ctx.clone();
    tokio::try_join!(hooks.warm_up(&snapshot), hooks.prepare(ctx))?;
    Ok(())
}
