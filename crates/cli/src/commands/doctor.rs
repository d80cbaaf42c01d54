//! `autopilot doctor`: Diagnose the local setup.

use std::path::{Path, PathBuf};

use autopilot_agent::{ConfigResolver, TaskContext};
use autopilot_config::AppConfig;
use autopilot_providers::resolve_endpoint;

/// Providers served from the local machine; they need no key.
const LOCAL_PROVIDERS: &[&str] = &["ollama", "lmstudio", "litellm"];

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Autopilot Doctor — System Diagnostics");
    println!("=======================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_path();
    if !config_path.exists() {
        println!("  ⚠️  No config file — run `autopilot onboard` (using defaults)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    let agent = ConfigResolver::new(config).build(&TaskContext::default());
    println!("  Provider: {}  Model: {}", agent.provider, agent.model_id);

    match resolve_endpoint(&agent.model_spec(), |var| std::env::var(var).ok()) {
        Some(endpoint) => {
            println!("  ✅ Provider supported ({})", endpoint.base_url);
            if endpoint.api_key.is_some() || LOCAL_PROVIDERS.contains(&agent.provider.as_str()) {
                println!("  ✅ API key configured");
            } else {
                println!("  ⚠️  No API key for {} — add api_key to config.toml", agent.provider);
                issues += 1;
            }
        }
        None => {
            println!("  ❌ Unsupported provider: {}", agent.provider);
            issues += 1;
        }
    }

    if agent.mcp_servers.is_empty() {
        println!("  ⚠️  No enabled tool servers — tasks run without tools");
        issues += 1;
    }
    for server in &agent.mcp_servers {
        let program = server.command.first().map(String::as_str).unwrap_or_default();
        if find_program(program).is_some() {
            println!("  ✅ Tool server '{}' ({program})", server.name);
        } else {
            println!("  ❌ Tool server '{}': '{program}' not found on PATH", server.name);
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

/// Resolve `program` the way a spawn would: paths as-is, bare names via `PATH`.
fn find_program(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        let exe = candidate.with_extension("exe");
        exe.is_file().then_some(exe)
    })
}
