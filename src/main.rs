use anyhow::Result;
use clap::{Parser, Subcommand};
use meridianbot::{Config, app};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meridianbot", version, about = "Telegram ⇄ Gemini relay bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot (default)
    Run,
    /// List persisted chats and their stored entry counts
    Chats,
    /// Drop all persisted state for a chat
    Clear { chat_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for Rustls TLS.
    // This prevents the error: "could not automatically determine the process-level CryptoProvider"
    // when both aws-lc-rs and ring features are available (or neither is explicitly selected).
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_init()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => app::run(config).await,
        Command::Chats => app::list_chats(config).await,
        Command::Clear { chat_id } => app::clear_chat(config, chat_id).await,
    }
}
