//! Model providers for Autopilot.
//!
//! Every supported provider is reached through an OpenAI-compatible
//! `/chat/completions` endpoint. The [`ProviderFactory`] maps a provider
//! name to its endpoint; [`OpenAiCompatModel`] streams a multi-step,
//! tool-executing run; [`direct_chat`] is the tool-less fast path.

pub mod direct_chat;
pub mod factory;
pub mod openai_compat;

pub use direct_chat::{
    ConversationTurn, DirectChatCallbacks, DirectChatConfig, DirectChatError, RetryPolicy,
    direct_chat_config, is_direct_chat_session, new_direct_session_id, run_direct_chat,
};
pub use factory::{Endpoint, ProviderFactory, resolve_endpoint};
pub use openai_compat::OpenAiCompatModel;
