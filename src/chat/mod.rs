pub mod cache;
pub mod history;
pub mod state;

pub use cache::{CHAT_KEY_PREFIX, ChatStateCache};
pub use history::{
    HISTORY_CHAR_BUDGET, HistoryManager, MAX_HISTORY_ENTRIES, build_request_history, encode_parts,
};
pub use state::{
    ChatSettings, ChatState, ContentPart, HistoryEntry, Role, ThinkingMode, TurnPart,
};
