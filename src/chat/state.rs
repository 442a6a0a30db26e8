use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// Current version of the persisted chat-state envelope.
pub const STATE_SCHEMA_VERSION: u32 = 1;

// ─── Turn content ───────────────────────────────────────────────────────────

/// Role of a stored conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

/// One serializable piece of a turn. The tagged encoding is the persisted
/// wire form; kinds added in the future decode to absent on old binaries
/// instead of poisoning the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { content: String },
    File { uri: String, mime_type: String },
}

impl ContentPart {
    /// Characters of model-visible text this part contributes.
    pub fn text_len(&self) -> usize {
        match self {
            Self::Text { content } => content.chars().count(),
            Self::File { .. } => 0,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }
}

/// A piece of an inbound turn before storage filtering. Channels may hand
/// the orchestrator content the model cannot consume (stickers, contacts,
/// polls); those arrive as `Unsupported` and are dropped at append time.
#[derive(Debug, Clone)]
pub enum TurnPart {
    Text(String),
    File { uri: String, mime_type: String },
    Unsupported { kind: String },
}

/// One user message or model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub parts: Vec<ContentPart>,
    /// Originating platform message id, for traceability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}

impl HistoryEntry {
    pub fn text_len(&self) -> usize {
        self.parts.iter().map(ContentPart::text_len).sum()
    }

    pub fn has_file(&self) -> bool {
        self.parts.iter().any(ContentPart::is_file)
    }
}

// ─── Per-chat settings ──────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ThinkingMode {
    Off,
    #[default]
    Balanced,
    Extended,
}

/// Validated per-chat settings, defaulted at decode time rather than at
/// each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default)]
    pub thinking: ThinkingMode,
    #[serde(default)]
    pub proactive_search: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            thinking: ThinkingMode::default(),
            proactive_search: false,
        }
    }
}

// ─── Chat state & persisted envelope ────────────────────────────────────────

/// Live per-chat state: bounded history plus settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub history: Vec<HistoryEntry>,
    pub settings: ChatSettings,
}

/// Versioned persisted form. History entries stay as raw JSON values so a
/// single undecodable entry is skipped instead of failing the whole load.
#[derive(Serialize, Deserialize)]
struct StoredChatState {
    version: u32,
    history: Vec<Value>,
    #[serde(default)]
    settings: ChatSettings,
}

impl ChatState {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let stored = StoredChatState {
            version: STATE_SCHEMA_VERSION,
            history: self
                .history
                .iter()
                .map(serde_json::to_value)
                .collect::<serde_json::Result<_>>()?,
            settings: self.settings,
        };
        serde_json::to_vec(&stored)
    }

    /// Reconstruct a state from persisted bytes. Decode failures are
    /// reported and skipped at the finest granularity that leaves the rest
    /// of the record usable; a fully unreadable blob yields a default state.
    pub fn decode(bytes: &[u8]) -> Self {
        let stored: StoredChatState = match serde_json::from_slice(bytes) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!("unreadable chat record, starting fresh: {err}");
                return Self::default();
            }
        };

        if stored.version > STATE_SCHEMA_VERSION {
            tracing::warn!(
                version = stored.version,
                supported = STATE_SCHEMA_VERSION,
                "chat record written by a newer version; unknown content will be dropped"
            );
        }

        let mut history = Vec::with_capacity(stored.history.len());
        for value in &stored.history {
            if let Some(entry) = decode_entry(value) {
                history.push(entry);
            } else {
                tracing::warn!("skipping undecodable history entry");
            }
        }

        Self {
            history,
            settings: stored.settings,
        }
    }
}

/// Decode one stored entry, filtering unknown part kinds. Entries whose
/// role is unrecognized or whose parts all fail to decode are absent.
fn decode_entry(value: &Value) -> Option<HistoryEntry> {
    let role: Role = serde_json::from_value(value.get("role")?.clone()).ok()?;
    let raw_parts = value.get("parts")?.as_array()?;

    let mut parts = Vec::with_capacity(raw_parts.len());
    for raw in raw_parts {
        match serde_json::from_value::<ContentPart>(raw.clone()) {
            Ok(part) => parts.push(part),
            Err(err) => tracing::warn!("dropping undecodable content part: {err}"),
        }
    }
    if parts.is_empty() {
        return None;
    }

    let message_id = value.get("message_id").and_then(Value::as_i64);
    Some(HistoryEntry {
        role,
        parts,
        message_id,
    })
}
