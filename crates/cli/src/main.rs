//! Autopilot CLI: the main entry point.
//!
//! Commands:
//! - `run`: Run one agent task, streaming its events
//! - `chat`: Direct chat without tools, single-message or interactive
//! - `tools`: Connect the configured tool servers and list their tools
//! - `onboard`: Write the default config
//! - `doctor`: Diagnose the local setup

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "autopilot",
    about = "Autopilot — tool-using agent tasks from the terminal",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task with the agent
    Run {
        /// The task prompt
        #[arg(short, long)]
        message: String,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Continue an earlier session (`direct-` sessions go to direct chat)
        #[arg(long)]
        session: Option<String>,

        /// Print every event as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Chat with the model directly, without tools
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Continue an earlier direct chat session
        #[arg(long)]
        session: Option<String>,
    },

    /// Connect the configured tool servers and list their tools
    Tools,

    /// Write the default configuration
    Onboard,

    /// Diagnose the local setup
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for task output.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            message,
            model,
            session,
            json,
        } => commands::run::run(message, model, session, json).await?,
        Commands::Chat {
            message,
            model,
            session,
        } => commands::chat::run(message, model, session).await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
