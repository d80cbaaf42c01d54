//! Model factory: maps a provider name to an OpenAI-compatible endpoint.
//!
//! Unknown providers resolve to `None`, which callers surface as an
//! unsupported-provider error.

use std::sync::Arc;

use autopilot_core::provider::{LanguageModel, ModelFactory, ModelSpec};

use crate::openai_compat::OpenAiCompatModel;

/// Everything needed to talk to one provider endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .finish()
    }
}

/// Strip a `provider/` prefix from a model id ("ollama/llama3.2" -> "llama3.2").
pub fn strip_provider_prefix<'a>(model_id: &'a str, provider: &str) -> &'a str {
    model_id
        .strip_prefix(provider)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(model_id)
}

/// Default API base URL for hosted providers.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    let url = match provider {
        "openai" => "https://api.openai.com/v1",
        "anthropic" => "https://api.anthropic.com/v1",
        "google" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "groq" => "https://api.groq.com/openai/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "xai" => "https://api.x.ai/v1",
        "moonshot" => "https://api.moonshot.cn/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "minimax" => "https://api.minimax.chat/v1",
        "zai" | "zai-coding-plan" => "https://api.z.ai/v1",
        _ => return None,
    };
    Some(url)
}

/// Local servers take a host URL; the `/v1` suffix is appended.
fn local_base_url(base_url: Option<&str>, default_host: &str) -> String {
    let host = base_url.unwrap_or(default_host).trim_end_matches('/');
    if host.ends_with("/v1") {
        host.to_string()
    } else {
        format!("{host}/v1")
    }
}

/// Environment variable holding the API key for `provider`.
fn key_env_var(provider: &str) -> Option<&'static str> {
    let var = match provider {
        "openai" => "OPENAI_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        "google" => "GOOGLE_GENERATIVE_AI_API_KEY",
        "groq" => "GROQ_API_KEY",
        "deepseek" => "DEEPSEEK_API_KEY",
        "xai" => "XAI_API_KEY",
        "moonshot" => "MOONSHOT_API_KEY",
        "openrouter" => "OPENROUTER_API_KEY",
        "minimax" => "MINIMAX_API_KEY",
        "zai" | "zai-coding-plan" => "ZAI_API_KEY",
        _ => return None,
    };
    Some(var)
}

/// Resolve the endpoint for `spec`, reading fallback keys through `env`.
pub fn resolve_endpoint(
    spec: &ModelSpec,
    env: impl Fn(&str) -> Option<String>,
) -> Option<Endpoint> {
    let provider = spec.provider.as_str();
    let explicit_key = spec.api_key.clone().filter(|k| !k.is_empty());
    let model = strip_provider_prefix(&spec.model_id, provider).to_string();

    let (base_url, api_key, model) = match provider {
        "ollama" => (
            local_base_url(spec.base_url.as_deref(), "http://localhost:11434"),
            None,
            model,
        ),
        "lmstudio" => (
            local_base_url(spec.base_url.as_deref(), "http://localhost:1234"),
            None,
            model,
        ),
        "litellm" => (
            local_base_url(spec.base_url.as_deref(), "http://localhost:4000"),
            Some(explicit_key.unwrap_or_else(|| "not-needed".into())),
            model,
        ),
        "azure-foundry" => {
            let base_url = spec.base_url.as_deref()?.trim_end_matches('/').to_string();
            (base_url, Some(explicit_key?), model)
        }
        // OpenRouter ids are themselves namespaced ("anthropic/claude-...").
        "openrouter" => (
            default_base_url(provider)?.to_string(),
            explicit_key.or_else(|| key_env_var(provider).and_then(&env)),
            spec.model_id.clone(),
        ),
        "openai" => (
            spec.base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            explicit_key.or_else(|| key_env_var(provider).and_then(&env)),
            model,
        ),
        _ => (
            default_base_url(provider)?.to_string(),
            explicit_key.or_else(|| key_env_var(provider).and_then(&env)),
            model,
        ),
    };

    Some(Endpoint {
        provider: provider.to_string(),
        base_url,
        api_key,
        model,
    })
}

/// Whether `provider` refuses `tool_choice: "required"`.
pub fn rejects_required_tool_choice(provider: &str) -> bool {
    matches!(provider, "groq")
}

/// Builds [`OpenAiCompatModel`]s for every provider known to [`resolve_endpoint`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ModelFactory for ProviderFactory {
    fn create_model(&self, spec: &ModelSpec) -> Option<Arc<dyn LanguageModel>> {
        let endpoint = resolve_endpoint(spec, |var| std::env::var(var).ok())?;
        let model = OpenAiCompatModel::new(&endpoint.provider, &endpoint.base_url, &endpoint.model)
            .with_api_key(endpoint.api_key)
            .with_rejects_required(rejects_required_tool_choice(&endpoint.provider));
        Some(Arc::new(model))
    }
}
