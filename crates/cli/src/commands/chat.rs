//! `autopilot chat`: Direct chat with the configured model, no tools.

use std::io::Write;

use autopilot_agent::{ConfigResolver, TaskContext};
use autopilot_config::AppConfig;
use autopilot_providers::{
    ConversationTurn, DirectChatCallbacks, DirectChatError, direct_chat_config,
    is_direct_chat_session, new_direct_session_id, run_direct_chat,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Progress on one status line, cleared before the reply is printed.
struct StatusLine;

impl StatusLine {
    fn clear(&self) {
        eprint!("\r\x1b[2K");
    }
}

impl DirectChatCallbacks for StatusLine {
    fn on_progress(&self, message: &str) {
        self.clear();
        eprint!("  {message}");
    }

    fn on_error(&self, error: &DirectChatError) {
        self.clear();
        tracing::debug!(error = %error, rate_limited = error.is_rate_limited(), "Direct chat error");
    }
}

/// The session a chat runs under: the caller's direct session, or a new one.
fn chat_session(session: Option<String>) -> Result<String, String> {
    match session {
        None => Ok(new_direct_session_id()),
        Some(id) if is_direct_chat_session(&id) => Ok(id),
        Some(id) => Err(format!(
            "Session '{id}' is an agent session; continue it with `autopilot run --session {id}`"
        )),
    }
}

pub async fn run(
    message: Option<String>,
    model: Option<String>,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session_id = chat_session(session)?;
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let ctx = TaskContext {
        model_id: model,
        ..TaskContext::default()
    };
    let agent = ConfigResolver::new(config.clone()).build(&ctx);
    let chat = direct_chat_config(
        &agent.provider,
        &agent.model_id,
        agent.base_url.as_deref(),
        agent.api_key.clone(),
    )
    .ok_or_else(|| format!("Provider '{}' does not support direct chat", agent.provider))?
    .with_settings(&config.direct_chat);

    let status = StatusLine;

    if let Some(msg) = message {
        // Single message mode
        let reply = run_direct_chat(&msg, &chat, &status, &[]).await;
        status.clear();
        println!("{}", reply?);
        eprintln!("  Session: {session_id}");
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Autopilot — Direct Chat");
    println!();
    println!("  Provider:  {}", chat.provider_id);
    println!("  Model:     {}", chat.model);
    println!("  Session:   {session_id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        match run_direct_chat(line, &chat, &status, &history).await {
            Ok(reply) => {
                status.clear();
                println!();
                for text in reply.lines() {
                    println!("  Assistant > {text}");
                }
                println!();
                history.push(ConversationTurn::user(line));
                history.push(ConversationTurn::assistant(reply));
            }
            Err(e) => {
                status.clear();
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}
