use super::traits::{Channel, ChannelMessage};
use crate::agent::Orchestrator;
use crate::chat::ThinkingMode;
use crate::error::{MeridianError, ModelError, Result, StoreError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const INBOUND_QUEUE_DEPTH: usize = 64;

const HELP_TEXT: &str = "I relay this chat to a generative model and remember our \
conversation.\n\n\
Send text, photos, documents, voice notes or videos.\n\n\
Commands:\n\
/clear — forget this chat's history\n\
/thinking <off|balanced|extended> — set reasoning depth\n\
/search <on|off> — toggle proactive web search\n\
/help — this message";

/// Routes inbound platform events to command handlers or the orchestrator.
/// One task per message; per-chat ordering comes from the state cache's
/// per-chat lock, so two chats never wait on each other.
pub struct Dispatcher {
    channel: Arc<dyn Channel>,
    orchestrator: Arc<Orchestrator>,
}

/// User-facing bot commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Clear,
    Thinking(Option<ThinkingMode>),
    Search(Option<bool>),
    Unknown(String),
}

impl Command {
    /// Parse command text (`/cmd arg`). Returns `None` for non-commands.
    /// A `@botname` suffix on the command is tolerated.
    pub fn parse(text: Option<&str>) -> Option<Self> {
        let text = text?.trim();
        if !text.starts_with('/') {
            return None;
        }

        let mut tokens = text.split_whitespace();
        let command = tokens.next()?;
        let command = command.split('@').next().unwrap_or(command);
        let argument = tokens.next();

        Some(match command {
            "/start" => Self::Start,
            "/help" => Self::Help,
            "/clear" => Self::Clear,
            "/thinking" => Self::Thinking(argument.and_then(|arg| arg.parse().ok())),
            "/search" => Self::Search(match argument {
                Some("on") => Some(true),
                Some("off") => Some(false),
                _ => None,
            }),
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// Short user-visible text for a failed turn. Details stay in the logs.
pub fn user_facing_message(err: &MeridianError) -> &'static str {
    match err {
        MeridianError::Store(StoreError::Unavailable { .. }) => {
            "I'm having trouble reaching my memory right now — please try again in a moment."
        }
        MeridianError::Model(ModelError::FileActivation { .. }) => {
            "That file took too long to process. Please send it again."
        }
        MeridianError::Model(_) => {
            "The model backend had a problem with that request. Please try again."
        }
        _ => "Something went wrong handling that message. Please try again.",
    }
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn Channel>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            channel,
            orchestrator,
        }
    }

    /// Pump inbound messages until shutdown, then drain in-flight turns.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<ChannelMessage>(INBOUND_QUEUE_DEPTH);

        let listener = {
            let channel = self.channel.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { channel.listen(tx, token).await })
        };

        let mut inflight: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                inbound = rx.recv() => match inbound {
                    Some(message) => {
                        let channel = self.channel.clone();
                        let orchestrator = self.orchestrator.clone();
                        inflight.spawn(handle_message(channel, orchestrator, message));
                    }
                    None => break,
                },
                Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                () = shutdown.cancelled() => break,
            }
        }

        // New events stop above; let in-flight turns finish before teardown.
        while inflight.join_next().await.is_some() {}

        match listener.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!("listener exited with error: {err}"),
            Err(err) => tracing::warn!("listener task failed: {err}"),
        }
        Ok(())
    }
}

async fn handle_message(
    channel: Arc<dyn Channel>,
    orchestrator: Arc<Orchestrator>,
    message: ChannelMessage,
) {
    let chat_id = message.chat_id;
    if let Err(err) = route(channel.as_ref(), orchestrator.as_ref(), message).await {
        tracing::error!(chat_id, "turn failed: {err}");
        let notice = user_facing_message(&err);
        if let Err(send_err) = channel.send(chat_id, notice).await {
            tracing::error!(chat_id, "failed to deliver error notice: {send_err}");
        }
    }
}

async fn route(
    channel: &dyn Channel,
    orchestrator: &Orchestrator,
    message: ChannelMessage,
) -> Result<()> {
    if let Some(command) = Command::parse(message.text.as_deref()) {
        return handle_command(channel, orchestrator, message.chat_id, command).await;
    }

    let chat_id = message.chat_id;
    // Typing indicator is best-effort; a failure must not block the turn.
    if let Err(err) = channel.send_typing(chat_id).await {
        tracing::debug!(chat_id, "typing indicator failed: {err}");
    }

    if let Some(reply) = orchestrator.handle_turn(message.into_turn()).await? {
        channel.send_chunked(chat_id, &reply).await?;
    }
    Ok(())
}

async fn handle_command(
    channel: &dyn Channel,
    orchestrator: &Orchestrator,
    chat_id: i64,
    command: Command,
) -> Result<()> {
    let reply = match command {
        Command::Start | Command::Help => HELP_TEXT.to_string(),
        Command::Clear => {
            orchestrator.clear_chat(chat_id).await?;
            "History cleared.".to_string()
        }
        Command::Thinking(Some(mode)) => {
            orchestrator.set_thinking(chat_id, mode).await?;
            format!("Thinking mode set to {mode}.")
        }
        Command::Thinking(None) => "Usage: /thinking <off|balanced|extended>".to_string(),
        Command::Search(Some(enabled)) => {
            orchestrator.set_proactive_search(chat_id, enabled).await?;
            if enabled {
                "Proactive web search enabled.".to_string()
            } else {
                "Proactive web search disabled.".to_string()
            }
        }
        Command::Search(None) => "Usage: /search <on|off>".to_string(),
        Command::Unknown(name) => format!("Unknown command {name}. Send /help for options."),
    };

    channel.send(chat_id, &reply).await?;
    Ok(())
}
