use super::state::ChatState;
use crate::error::Result;
use crate::store::DurableStore;
use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Store key prefix for per-chat records.
pub const CHAT_KEY_PREFIX: &str = "chat_data_";

fn chat_key(chat_id: i64) -> String {
    format!("{CHAT_KEY_PREFIX}{chat_id}")
}

/// Read-through cache of live per-chat state.
///
/// Each chat maps to one `Arc<Mutex<ChatState>>`. The tokio mutex is the
/// serialization scope for a whole load→mutate→save exchange: callers hold
/// it across the turn so concurrent messages in one chat cannot clobber
/// each other's history. Distinct chats never contend. Saves are
/// write-through; there is no deferred flush.
pub struct ChatStateCache {
    store: Arc<DurableStore>,
    states: std::sync::Mutex<HashMap<i64, Arc<Mutex<ChatState>>>>,
}

impl ChatStateCache {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self {
            store,
            states: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Live handle for a chat, reading through to the store on first
    /// access. A chat with no persisted record starts from defaults.
    pub async fn load(&self, chat_id: i64) -> Result<Arc<Mutex<ChatState>>> {
        if let Some(entry) = self.lock_states()?.get(&chat_id) {
            return Ok(entry.clone());
        }

        let state = self.load_from_store(chat_id).await?;
        let mut states = self.lock_states()?;
        // A concurrent first access may have inserted meanwhile; the first
        // entry wins so every caller shares one identity.
        let entry = states
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(state)))
            .clone();
        Ok(entry)
    }

    /// Persist `state` immediately under the chat's record key.
    pub async fn save(&self, chat_id: i64, state: &ChatState) -> Result<()> {
        let bytes = state.encode().context("encode chat state")?;
        self.store.set(&chat_key(chat_id), &bytes).await?;
        Ok(())
    }

    /// Remove the chat from the cache and the store. The next `load`
    /// returns a fresh default state.
    pub async fn drop_chat(&self, chat_id: i64) -> Result<()> {
        self.lock_states()?.remove(&chat_id);
        self.store.delete(&chat_key(chat_id)).await?;
        Ok(())
    }

    /// Merge store-persisted data into a live state without replacing its
    /// identity — the handle may be held elsewhere.
    pub async fn refresh(&self, chat_id: i64, target: &mut ChatState) -> Result<()> {
        let loaded = self.load_from_store(chat_id).await?;
        target.history = loaded.history;
        target.settings = loaded.settings;
        Ok(())
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    async fn load_from_store(&self, chat_id: i64) -> Result<ChatState> {
        match self.store.get(&chat_key(chat_id)).await? {
            Some(bytes) => Ok(ChatState::decode(&bytes)),
            None => Ok(ChatState::default()),
        }
    }

    fn lock_states(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<i64, Arc<Mutex<ChatState>>>>> {
        self.states
            .lock()
            .map_err(|error| anyhow::anyhow!("cache lock error: {error}").into())
    }
}
