//! # Autopilot Core
//!
//! Domain types, traits, and error definitions for the Autopilot task runner.
//! This crate has **no framework dependencies** beyond async plumbing: it defines
//! the domain model that the tool gateway, the model invoker and the agent
//! adapter are written against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the agent loop talks to is a trait here:
//! - [`LanguageModel`] streams [`StepEvent`]s for one task turn
//! - [`Tool`] is a single callable capability, grouped into a [`ToolSet`]
//! - [`Closeable`] is a tool-provider connection the loop must shut down
//!
//! Implementations live in their respective crates, so the agent loop can be
//! driven end to end with scripted stand-ins in tests.

pub mod display;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{AgentError, Error, ProviderError, Result, ToolError};
pub use event::{AgentEvent, EventBus, EventReceiver, ProgressStage};
pub use message::TaskMessage;
pub use provider::{
    FinishReason, LanguageModel, ModelFactory, ModelSpec, StepEvent, StepStream, StopReason,
    StreamRequest, ToolChoice,
};
pub use task::{Task, TaskConfig, TaskResult, TaskStatus, TodoItem, TodoPriority, TodoStatus};
pub use tool::{Closeable, ConnectionSet, Tool, ToolDefinition, ToolResult, ToolSet};
