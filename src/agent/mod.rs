//! Request orchestration: everything between "an inbound turn arrived"
//! and "a reply is ready to send".
//!
//! The orchestrator reconstructs budgeted history, injects contextual
//! text, dispatches to the model client, and appends the exchange back
//! into history. Collaborator failures are caught here and surfaced as
//! per-request errors; a failed turn never mutates history.

pub mod context;

use crate::channels::traits::InboundTurn;
use crate::chat::{
    ChatSettings, ChatStateCache, HistoryEntry, HistoryManager, Role, ThinkingMode, TurnPart,
    build_request_history, encode_parts,
};
use crate::error::Result;
use crate::providers::{ModelClient, RequestContent, ToolSet};
use crate::search::SearchLookup;
use std::sync::Arc;

pub struct Orchestrator {
    cache: Arc<ChatStateCache>,
    history: HistoryManager,
    model: Arc<dyn ModelClient>,
    search: Option<Arc<dyn SearchLookup>>,
}

/// Whether any part of the assembled request carries a file reference.
/// The caller maps this to the tool-set choice.
pub fn request_uses_files(history: &[HistoryEntry], new_parts: &[TurnPart]) -> bool {
    history.iter().any(HistoryEntry::has_file)
        || new_parts
            .iter()
            .any(|part| matches!(part, TurnPart::File { .. }))
}

impl Orchestrator {
    pub fn new(
        cache: Arc<ChatStateCache>,
        model: Arc<dyn ModelClient>,
        search: Option<Arc<dyn SearchLookup>>,
    ) -> Self {
        Self {
            history: HistoryManager::new(cache.clone()),
            cache,
            model,
            search,
        }
    }

    /// Process one inbound turn end to end. Returns the reply text, or
    /// `None` when the turn carried nothing the model can consume (which
    /// is silently ignored, not an error).
    ///
    /// The chat's state lock is held for the whole exchange so concurrent
    /// messages in the same chat serialize instead of clobbering each
    /// other's history.
    pub async fn handle_turn(&self, turn: InboundTurn) -> Result<Option<String>> {
        let handle = self.cache.load(turn.chat_id).await?;
        let mut state = handle.lock().await;

        let mut original_parts: Vec<TurnPart> = Vec::new();
        if let Some(text) = turn.text.as_deref()
            && !text.trim().is_empty()
        {
            original_parts.push(TurnPart::Text(text.to_string()));
        }
        for attachment in &turn.attachments {
            let file = self
                .model
                .upload_file(attachment.data.clone(), &attachment.mime_type)
                .await?;
            original_parts.push(TurnPart::File {
                uri: file.uri,
                mime_type: file.mime_type,
            });
        }
        for kind in &turn.unsupported {
            original_parts.push(TurnPart::Unsupported { kind: kind.clone() });
        }

        let new_parts = encode_parts(&original_parts);
        if new_parts.is_empty() {
            tracing::debug!(chat_id = turn.chat_id, "turn had no relayable content");
            return Ok(None);
        }

        let past = build_request_history(&state);
        let uses_files = request_uses_files(&past, &original_parts);
        let tools = if uses_files {
            ToolSet::Media
        } else {
            ToolSet::Standard
        };

        let search_block = self
            .search_block(&state.settings, uses_files, turn.text.as_deref())
            .await;

        // Injection happens on a copy of the outbound parts; the history
        // append below uses the original text only.
        let mut outbound_parts = new_parts.clone();
        if let Some(crate::chat::ContentPart::Text { content }) = outbound_parts
            .iter_mut()
            .find(|part| !part.is_file())
        {
            *content = context::inject_context(content, search_block.as_deref());
        }

        let mut contents: Vec<RequestContent> = past
            .into_iter()
            .map(|entry| RequestContent {
                role: entry.role,
                parts: entry.parts,
            })
            .collect();
        contents.push(RequestContent {
            role: Role::User,
            parts: outbound_parts,
        });

        let reply = self
            .model
            .generate(&contents, tools, &state.settings)
            .await?;

        self.history
            .append(
                turn.chat_id,
                &mut state,
                Role::User,
                &original_parts,
                turn.message_id,
            )
            .await?;
        self.history
            .append(
                turn.chat_id,
                &mut state,
                Role::Model,
                &[TurnPart::Text(reply.clone())],
                None,
            )
            .await?;

        Ok(Some(reply))
    }

    async fn search_block(
        &self,
        settings: &ChatSettings,
        uses_files: bool,
        text: Option<&str>,
    ) -> Option<String> {
        if !settings.proactive_search || uses_files {
            return None;
        }
        let query = text?.trim();
        if query.is_empty() {
            return None;
        }
        let search = self.search.as_ref()?;
        match search.snippets(query).await {
            Ok(block) => block,
            Err(err) => {
                tracing::warn!("search lookup failed, continuing without snippets: {err}");
                None
            }
        }
    }

    /// Set the per-chat thinking mode and persist immediately.
    pub async fn set_thinking(&self, chat_id: i64, mode: ThinkingMode) -> Result<()> {
        self.mutate_settings(chat_id, |settings| settings.thinking = mode)
            .await
    }

    /// Toggle proactive search and persist immediately.
    pub async fn set_proactive_search(&self, chat_id: i64, enabled: bool) -> Result<()> {
        self.mutate_settings(chat_id, |settings| settings.proactive_search = enabled)
            .await
    }

    pub async fn settings(&self, chat_id: i64) -> Result<ChatSettings> {
        let handle = self.cache.load(chat_id).await?;
        let state = handle.lock().await;
        Ok(state.settings)
    }

    /// Remove every trace of a chat, cached and persisted.
    pub async fn clear_chat(&self, chat_id: i64) -> Result<()> {
        self.cache.drop_chat(chat_id).await
    }

    async fn mutate_settings(
        &self,
        chat_id: i64,
        mutate: impl FnOnce(&mut ChatSettings),
    ) -> Result<()> {
        let handle = self.cache.load(chat_id).await?;
        let mut state = handle.lock().await;
        mutate(&mut state.settings);
        self.cache.save(chat_id, &state).await
    }
}
