//! Wiring: build the store, cache, orchestrator and channel from config
//! and run the dispatch loop until shutdown.

use crate::agent::Orchestrator;
use crate::channels::{Channel, Dispatcher, TelegramChannel};
use crate::chat::ChatStateCache;
use crate::config::Config;
use crate::providers::{GeminiClient, ModelClient};
use crate::search::{BraveSearch, SearchLookup};
use crate::store::DurableStore;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run the bot until a shutdown signal, then drain and tear down.
pub async fn run(config: Config) -> Result<()> {
    config.validate_for_run()?;

    let store = Arc::new(
        DurableStore::connect_with(&config.database_path(), config.retry_policy()).await?,
    );
    let cache = Arc::new(ChatStateCache::new(store.clone()));

    let api_key = config.gemini.api_key.clone().unwrap_or_default();
    let model: Arc<dyn ModelClient> =
        Arc::new(GeminiClient::new(api_key, Some(&config.gemini.model)));

    let search: Option<Arc<dyn SearchLookup>> =
        config.search.brave_api_key.as_ref().map(|key| {
            Arc::new(BraveSearch::new(key.clone(), config.search.max_results))
                as Arc<dyn SearchLookup>
        });
    if search.is_none() {
        tracing::info!("no search API key configured; proactive search is unavailable");
    }

    let orchestrator = Arc::new(Orchestrator::new(cache, model, search));

    let bot_token = config.telegram.bot_token.clone().unwrap_or_default();
    let channel: Arc<dyn Channel> = Arc::new(TelegramChannel::new(
        bot_token,
        config.telegram.allowed_chats.clone(),
    ));

    let dispatcher = Dispatcher::new(channel, orchestrator);

    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, draining in-flight turns");
                token.cancel();
            }
        });
    }

    dispatcher.run(shutdown).await?;

    store.close().await;
    tracing::info!("chat record store closed");
    Ok(())
}

/// Print every persisted chat with its stored entry count.
pub async fn list_chats(config: Config) -> Result<()> {
    use crate::chat::{CHAT_KEY_PREFIX, ChatState};

    let store =
        DurableStore::connect_with(&config.database_path(), config.retry_policy()).await?;
    let records = store.list_by_prefix(CHAT_KEY_PREFIX).await?;

    if records.is_empty() {
        println!("no persisted chats");
    }
    for (key, bytes) in &records {
        let chat_id = key.trim_start_matches(CHAT_KEY_PREFIX);
        let state = ChatState::decode(bytes);
        println!(
            "{chat_id}: {} entries, thinking={}, search={}",
            state.history.len(),
            state.settings.thinking,
            if state.settings.proactive_search {
                "on"
            } else {
                "off"
            }
        );
    }

    store.close().await;
    Ok(())
}

/// Drop all persisted and cached state for one chat (admin-side clear).
pub async fn clear_chat(config: Config, chat_id: i64) -> Result<()> {
    let store = Arc::new(
        DurableStore::connect_with(&config.database_path(), config.retry_policy()).await?,
    );
    let cache = ChatStateCache::new(store.clone());
    cache.drop_chat(chat_id).await?;
    store.close().await;
    tracing::info!(chat_id, "chat state cleared");
    Ok(())
}
