//! The agent adapter for Autopilot.
//!
//! Turns one user prompt into a bounded, tool-using model conversation:
//!
//! 1. **Prepare** the task (hooks, config, model, tool servers)
//! 2. **Stream** the model, folding step events into messages and tool events
//! 3. **Enforce** completion: a task that declared a plan must call the
//!    completion tool, or it is nudged once and then finished anyway
//! 4. **Report** exactly one terminal `complete` event, and close every
//!    tool connection
//!
//! Everything the adapter talks to is injected, so tests drive it with a
//! scripted model and fake tool servers.

pub mod adapter;
pub mod agent_config;
pub mod bypass;
pub mod completion;
pub mod hooks;
pub mod policy;
pub mod turn;

pub use adapter::{AgentAdapter, new_session_id};
pub use agent_config::{
    AgentConfig, AgentConfigResolver, CONTINUATION_NOTE, ConfigResolver, DEFAULT_SYSTEM_PROMPT,
    SETTING_MCP_SERVERS, SETTING_SYSTEM_PROMPT,
};
pub use bypass::DirectSearch;
pub use completion::{CompletionEnforcer, CompletionState, ExitAction, Verdict};
pub use hooks::{NoHooks, TaskContext, TaskHooks};
pub use turn::TurnAccumulator;
