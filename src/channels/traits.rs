use crate::error::ChannelError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Media downloaded from the platform, ready for relay to the model.
#[derive(Debug, Clone)]
pub struct MediaAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
    pub filename: Option<String>,
}

/// One normalized inbound turn handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct InboundTurn {
    pub chat_id: i64,
    pub message_id: Option<i64>,
    pub text: Option<String>,
    pub attachments: Vec<MediaAttachment>,
    /// Content kinds the platform sent that cannot be relayed (stickers,
    /// polls, ...). Carried so the orchestrator can account for them.
    pub unsupported: Vec<String>,
}

/// A message received from the chat platform.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: String,
    pub chat_id: i64,
    pub message_id: Option<i64>,
    pub text: Option<String>,
    pub attachments: Vec<MediaAttachment>,
    pub unsupported: Vec<String>,
    pub timestamp: u64,
}

impl ChannelMessage {
    pub fn into_turn(self) -> InboundTurn {
        InboundTurn {
            chat_id: self.chat_id,
            message_id: self.message_id,
            text: self.text,
            attachments: self.attachments,
            unsupported: self.unsupported,
        }
    }
}

/// Core channel trait — implement for any messaging platform.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    fn max_message_length(&self) -> usize {
        usize::MAX
    }

    /// Send a message through this channel
    async fn send(&self, chat_id: i64, message: &str) -> Result<(), ChannelError>;

    async fn send_typing(&self, _chat_id: i64) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Start listening for incoming messages (long-running). Returns when
    /// `shutdown` fires or the receiver side is dropped.
    async fn listen(
        &self,
        tx: tokio::sync::mpsc::Sender<ChannelMessage>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()>;

    /// Send a long message split at the platform's length limit.
    async fn send_chunked(&self, chat_id: i64, message: &str) -> Result<(), ChannelError> {
        for chunk in chunk_message(message, self.max_message_length()) {
            self.send(chat_id, &chunk).await?;
        }
        Ok(())
    }
}

/// Split `message` into chunks of at most `max_len` characters, keeping
/// char boundaries intact.
pub fn chunk_message(message: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || message.chars().count() <= max_len {
        return vec![message.to_string()];
    }
    let chars: Vec<char> = message.chars().collect();
    chars
        .chunks(max_len)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
