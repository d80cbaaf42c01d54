//! `autopilot onboard`: First-time setup.

use autopilot_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = AppConfig::config_path();

    println!("Autopilot — First-Time Setup");
    println!("============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Pick a provider and model in {}", config_path.display());
    println!("   2. Add an API key, or export one (e.g. OPENAI_API_KEY)");
    println!("   3. Add your tool servers under [[mcp_servers]]");
    println!("   4. Run: autopilot doctor\n");

    println!("🎉 Setup complete! Run `autopilot run -m \"...\"` to start a task.\n");

    Ok(())
}
