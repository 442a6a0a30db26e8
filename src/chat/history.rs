use super::cache::ChatStateCache;
use super::state::{ChatState, ContentPart, HistoryEntry, Role, TurnPart};
use crate::error::Result;
use std::sync::Arc;

/// History length cap: oldest entries drop first once exceeded.
pub const MAX_HISTORY_ENTRIES: usize = 40;

/// Character budget bounding how much history text is sent per request,
/// applied at read time independently of the entry-count cap.
pub const HISTORY_CHAR_BUDGET: usize = 120_000;

/// Owns the append/trim/reconstruct pipeline for per-chat message logs.
pub struct HistoryManager {
    cache: Arc<ChatStateCache>,
}

impl HistoryManager {
    pub fn new(cache: Arc<ChatStateCache>) -> Self {
        Self { cache }
    }

    /// Append one turn and write the chat through to the store.
    ///
    /// Parts the model cannot consume are dropped; a turn with nothing
    /// serializable leaves both history and persisted bytes untouched.
    /// Returns whether an entry was appended.
    pub async fn append(
        &self,
        chat_id: i64,
        state: &mut ChatState,
        role: Role,
        parts: &[TurnPart],
        message_id: Option<i64>,
    ) -> Result<bool> {
        let encoded = encode_parts(parts);
        if encoded.is_empty() {
            return Ok(false);
        }

        state.history.push(HistoryEntry {
            role,
            parts: encoded,
            message_id,
        });
        if state.history.len() > MAX_HISTORY_ENTRIES {
            let excess = state.history.len() - MAX_HISTORY_ENTRIES;
            state.history.drain(..excess);
        }

        self.cache.save(chat_id, state).await?;
        Ok(true)
    }
}

/// Encode inbound parts into their storable form, dropping the rest.
pub fn encode_parts(parts: &[TurnPart]) -> Vec<ContentPart> {
    parts
        .iter()
        .filter_map(|part| match part {
            TurnPart::Text(content) => Some(ContentPart::Text {
                content: content.clone(),
            }),
            TurnPart::File { uri, mime_type } => Some(ContentPart::File {
                uri: uri.clone(),
                mime_type: mime_type.clone(),
            }),
            TurnPart::Unsupported { kind } => {
                tracing::debug!(kind, "dropping unsupported turn part");
                None
            }
        })
        .collect()
}

/// The most recent history that fits the character budget, oldest first.
///
/// Walks entries newest→oldest accumulating decoded text length, stops at
/// the first entry that would push the total over [`HISTORY_CHAR_BUDGET`]
/// (entries are never partially included), then restores chronological
/// order. Recent context always wins over old context.
pub fn build_request_history(state: &ChatState) -> Vec<HistoryEntry> {
    let mut selected = Vec::new();
    let mut total_chars = 0usize;

    for entry in state.history.iter().rev() {
        if entry.parts.is_empty() {
            continue;
        }
        let chars = entry.text_len();
        if total_chars + chars > HISTORY_CHAR_BUDGET {
            break;
        }
        total_chars += chars;
        selected.push(entry.clone());
    }

    selected.reverse();
    selected
}

#[cfg(test)]
mod tests {
    use super::{
        HISTORY_CHAR_BUDGET, HistoryManager, MAX_HISTORY_ENTRIES, build_request_history,
        encode_parts,
    };
    use crate::chat::cache::ChatStateCache;
    use crate::chat::state::{ChatState, ContentPart, HistoryEntry, Role, TurnPart};
    use crate::store::DurableStore;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn manager() -> (Arc<ChatStateCache>, HistoryManager) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let cache = Arc::new(ChatStateCache::new(Arc::new(
            DurableStore::new(pool).await.unwrap(),
        )));
        (cache.clone(), HistoryManager::new(cache))
    }

    fn text_turn(content: &str) -> Vec<TurnPart> {
        vec![TurnPart::Text(content.into())]
    }

    fn stored_entry(role: Role, chars: usize) -> HistoryEntry {
        HistoryEntry {
            role,
            parts: vec![ContentPart::Text {
                content: "x".repeat(chars),
            }],
            message_id: None,
        }
    }

    #[tokio::test]
    async fn append_grows_history_one_entry_per_turn() {
        let (_cache, manager) = manager().await;
        let mut state = ChatState::default();

        for i in 0..10 {
            let appended = manager
                .append(1, &mut state, Role::User, &text_turn(&format!("m{i}")), None)
                .await
                .unwrap();
            assert!(appended);
        }

        assert_eq!(state.history.len(), 10);
    }

    #[tokio::test]
    async fn history_is_capped_at_newest_forty() {
        let (_cache, manager) = manager().await;
        let mut state = ChatState::default();

        for i in 0..45 {
            manager
                .append(1, &mut state, Role::User, &text_turn(&format!("m{i}")), None)
                .await
                .unwrap();
        }

        assert_eq!(state.history.len(), MAX_HISTORY_ENTRIES);
        let first = &state.history[0].parts[0];
        let last = &state.history[MAX_HISTORY_ENTRIES - 1].parts[0];
        assert_eq!(first, &ContentPart::Text { content: "m5".into() });
        assert_eq!(last, &ContentPart::Text { content: "m44".into() });
    }

    #[tokio::test]
    async fn unserializable_turn_is_a_noop_with_no_write() {
        let (cache, manager) = manager().await;
        let mut state = ChatState::default();

        let appended = manager
            .append(
                1,
                &mut state,
                Role::User,
                &[TurnPart::Unsupported {
                    kind: "sticker".into(),
                }],
                None,
            )
            .await
            .unwrap();

        assert!(!appended);
        assert!(state.history.is_empty());
        // Nothing must have been written through either.
        let reloaded = cache.load(1).await.unwrap();
        assert!(reloaded.lock().await.history.is_empty());
    }

    #[tokio::test]
    async fn append_writes_through_to_store() {
        let (cache, manager) = manager().await;
        let mut state = ChatState::default();
        manager
            .append(9, &mut state, Role::User, &text_turn("persist me"), Some(5))
            .await
            .unwrap();

        let reloaded = cache.load(9).await.unwrap();
        let loaded = reloaded.lock().await;
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.history[0].message_id, Some(5));
    }

    #[test]
    fn encode_parts_filters_unsupported_kinds() {
        let parts = vec![
            TurnPart::Text("hi".into()),
            TurnPart::Unsupported {
                kind: "poll".into(),
            },
            TurnPart::File {
                uri: "files/x".into(),
                mime_type: "video/mp4".into(),
            },
        ];

        let encoded = encode_parts(&parts);
        assert_eq!(encoded.len(), 2);
        assert!(encoded[1].is_file());
    }

    #[test]
    fn budget_walk_prefers_newest_and_never_splits_entries() {
        // Four 50k-char entries, oldest→newest. Walking from the newest:
        // 50k, then 100k fit; the third would reach 150k and stops the walk.
        let state = ChatState {
            history: vec![
                stored_entry(Role::User, 50_000),
                stored_entry(Role::Model, 50_000),
                stored_entry(Role::User, 50_000),
                stored_entry(Role::Model, 50_000),
            ],
            settings: Default::default(),
        };

        let request = build_request_history(&state);
        assert_eq!(request.len(), 2);
        assert_eq!(request[0].role, Role::User);
        assert_eq!(request[1].role, Role::Model);
    }

    #[test]
    fn budget_total_never_exceeds_cap() {
        let state = ChatState {
            history: (0..30).map(|_| stored_entry(Role::User, 9_999)).collect(),
            settings: Default::default(),
        };

        let request = build_request_history(&state);
        let total: usize = request.iter().map(HistoryEntry::text_len).sum();
        assert!(total <= HISTORY_CHAR_BUDGET);
        assert_eq!(request.len(), 12);
    }

    #[test]
    fn entry_exactly_at_budget_is_included() {
        let state = ChatState {
            history: vec![stored_entry(Role::User, HISTORY_CHAR_BUDGET)],
            settings: Default::default(),
        };

        let request = build_request_history(&state);
        assert_eq!(request.len(), 1);
    }

    #[test]
    fn request_history_is_chronological() {
        let state = ChatState {
            history: vec![
                HistoryEntry {
                    role: Role::User,
                    parts: vec![ContentPart::Text {
                        content: "first".into(),
                    }],
                    message_id: None,
                },
                HistoryEntry {
                    role: Role::Model,
                    parts: vec![ContentPart::Text {
                        content: "second".into(),
                    }],
                    message_id: None,
                },
            ],
            settings: Default::default(),
        };

        let request = build_request_history(&state);
        assert_eq!(
            request[0].parts[0],
            ContentPart::Text {
                content: "first".into()
            }
        );
        assert_eq!(
            request[1].parts[0],
            ContentPart::Text {
                content: "second".into()
            }
        );
    }

    #[test]
    fn file_only_entries_cost_no_budget() {
        let mut history = vec![HistoryEntry {
            role: Role::User,
            parts: vec![ContentPart::File {
                uri: "files/a".into(),
                mime_type: "image/png".into(),
            }],
            message_id: None,
        }];
        history.push(stored_entry(Role::Model, HISTORY_CHAR_BUDGET));

        let state = ChatState {
            history,
            settings: Default::default(),
        };
        let request = build_request_history(&state);
        assert_eq!(request.len(), 2);
    }
}
