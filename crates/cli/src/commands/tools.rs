//! `autopilot tools`: Connect the configured tool servers and list their tools.

use autopilot_agent::{ConfigResolver, TaskContext};
use autopilot_config::AppConfig;
use autopilot_core::tool::ConnectionSet;
use autopilot_tools::ToolGateway;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let agent = ConfigResolver::new(config).build(&TaskContext::default());

    if agent.mcp_servers.is_empty() {
        println!("  No enabled tool servers. Add [[mcp_servers]] to config.toml.");
        return Ok(());
    }

    let mut connections = ConnectionSet::new();
    let connected = ToolGateway::new()
        .connect(&agent.mcp_servers, &mut connections)
        .await;
    let failures = connections.close_all().await;
    let tools = connected?;

    println!("  {} tool(s) from {} server(s):\n", tools.len(), agent.mcp_servers.len());
    let mut definitions = tools.definitions();
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    for def in definitions {
        let summary = def.description.lines().next().unwrap_or_default();
        println!("  {:<36} {summary}", def.name);
    }

    if !failures.is_empty() {
        println!("\n  ⚠️  {} server(s) did not close cleanly", failures.len());
    }
    Ok(())
}
