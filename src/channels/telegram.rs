use super::traits::{Channel, ChannelMessage, MediaAttachment};
use crate::error::ChannelError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram bot transport: long-poll ingestion plus message/file APIs.
pub struct TelegramChannel {
    client: Client,
    token: String,
    base_url: String,
    /// Empty means every chat is allowed.
    allowed_chats: Vec<i64>,
}

/// A platform file reference found in an update, before download.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MediaRef {
    file_id: String,
    mime_type: String,
    filename: Option<String>,
}

/// Update content after platform-specific parsing, before file download.
#[derive(Debug, Default, PartialEq, Eq)]
struct InboundUpdate {
    chat_id: i64,
    message_id: Option<i64>,
    text: Option<String>,
    media: Vec<MediaRef>,
    unsupported: Vec<String>,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, allowed_chats: Vec<i64>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            allowed_chats,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    fn file_download_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.base_url, self.token, file_path)
    }

    fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }

    /// Resolve a file_id into bytes: getFile for the path, then download.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        let response = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await
            .map_err(|err| ChannelError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::Download(format!(
                "getFile returned status {}",
                response.status()
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| ChannelError::Download(err.to_string()))?;
        let file_path = data
            .get("result")
            .and_then(|result| result.get("file_path"))
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Download("getFile response had no file_path".into()))?;

        let response = self
            .client
            .get(self.file_download_url(file_path))
            .send()
            .await
            .map_err(|err| ChannelError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::Download(format!(
                "file fetch returned status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ChannelError::Download(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn resolve_update(&self, update: InboundUpdate) -> Option<ChannelMessage> {
        let mut attachments = Vec::with_capacity(update.media.len());
        for media in &update.media {
            match self.download_file(&media.file_id).await {
                Ok(data) => attachments.push(MediaAttachment {
                    mime_type: media.mime_type.clone(),
                    data,
                    filename: media.filename.clone(),
                }),
                Err(err) => {
                    tracing::warn!(
                        chat_id = update.chat_id,
                        "failed to download attachment: {err}"
                    );
                }
            }
        }

        if update.text.is_none() && attachments.is_empty() && update.unsupported.is_empty() {
            return None;
        }

        Some(ChannelMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: update.chat_id,
            message_id: update.message_id,
            text: update.text,
            attachments,
            unsupported: update.unsupported,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        })
    }
}

/// Parse one getUpdates entry into normalized inbound content.
/// Returns `None` for update kinds we do not relay (edits, callbacks, ...).
fn extract_inbound(update: &Value) -> Option<InboundUpdate> {
    let message = update.get("message")?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let message_id = message.get("message_id").and_then(Value::as_i64);

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut media = Vec::new();
    let mut unsupported = Vec::new();

    // Telegram sends photos as an array of sizes, smallest first.
    if let Some(sizes) = message.get("photo").and_then(Value::as_array)
        && let Some(largest) = sizes.last()
        && let Some(file_id) = largest.get("file_id").and_then(Value::as_str)
    {
        media.push(MediaRef {
            file_id: file_id.to_string(),
            mime_type: "image/jpeg".to_string(),
            filename: None,
        });
    }

    for (key, default_mime) in [
        ("document", "application/octet-stream"),
        ("video", "video/mp4"),
        ("audio", "audio/mpeg"),
        ("voice", "audio/ogg"),
    ] {
        if let Some(object) = message.get(key)
            && let Some(file_id) = object.get("file_id").and_then(Value::as_str)
        {
            media.push(MediaRef {
                file_id: file_id.to_string(),
                mime_type: object
                    .get("mime_type")
                    .and_then(Value::as_str)
                    .unwrap_or(default_mime)
                    .to_string(),
                filename: object
                    .get("file_name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }

    for kind in ["sticker", "location", "contact", "poll", "venue"] {
        if message.get(kind).is_some() {
            unsupported.push(kind.to_string());
        }
    }

    if text.is_none() && media.is_empty() && unsupported.is_empty() {
        return None;
    }

    Some(InboundUpdate {
        chat_id,
        message_id,
        text,
        media,
        unsupported,
    })
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn max_message_length(&self) -> usize {
        MAX_MESSAGE_LENGTH
    }

    async fn send(&self, chat_id: i64, message: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": message,
            "parse_mode": "Markdown"
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|err| format!("<failed to read response body: {err}>"));
            return Err(ChannelError::Send {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "chat_id": chat_id, "action": "typing" });
        self.client
            .post(self.api_url("sendChatAction"))
            .json(&body)
            .send()
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        Ok(())
    }

    async fn listen(
        &self,
        tx: tokio::sync::mpsc::Sender<ChannelMessage>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"]
            });

            let request = self.client.post(self.api_url("getUpdates")).json(&body);
            let response = tokio::select! {
                result = request.send() => result,
                () = shutdown.cancelled() => return Ok(()),
            };

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!("Telegram poll error: {err}");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let data: Value = match response.json().await {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!("Telegram parse error: {err}");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let Some(results) = data.get("result").and_then(Value::as_array) else {
                continue;
            };
            for update in results {
                if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                    offset = update_id + 1;
                }

                let Some(inbound) = extract_inbound(update) else {
                    continue;
                };
                if !self.is_chat_allowed(inbound.chat_id) {
                    tracing::warn!(
                        chat_id = inbound.chat_id,
                        "ignoring message from chat outside the allowlist"
                    );
                    continue;
                }

                if let Some(message) = self.resolve_update(inbound).await
                    && tx.send(message).await.is_err()
                {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel_for(server: &MockServer) -> TelegramChannel {
        TelegramChannel::new("TOKEN", Vec::new()).with_base_url(server.uri())
    }

    #[test]
    fn extract_text_message() {
        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 55,
                "chat": { "id": -100123 },
                "text": "hello bot"
            }
        });

        let inbound = extract_inbound(&update).unwrap();
        assert_eq!(inbound.chat_id, -100_123);
        assert_eq!(inbound.message_id, Some(55));
        assert_eq!(inbound.text.as_deref(), Some("hello bot"));
        assert!(inbound.media.is_empty());
    }

    #[test]
    fn extract_photo_takes_largest_size_and_caption() {
        let update = serde_json::json!({
            "message": {
                "message_id": 7,
                "chat": { "id": 5 },
                "caption": "look at this",
                "photo": [
                    { "file_id": "small", "width": 90 },
                    { "file_id": "large", "width": 1280 }
                ]
            }
        });

        let inbound = extract_inbound(&update).unwrap();
        assert_eq!(inbound.text.as_deref(), Some("look at this"));
        assert_eq!(inbound.media.len(), 1);
        assert_eq!(inbound.media[0].file_id, "large");
        assert_eq!(inbound.media[0].mime_type, "image/jpeg");
    }

    #[test]
    fn extract_document_keeps_mime_and_filename() {
        let update = serde_json::json!({
            "message": {
                "chat": { "id": 5 },
                "document": {
                    "file_id": "doc1",
                    "mime_type": "application/pdf",
                    "file_name": "notes.pdf"
                }
            }
        });

        let inbound = extract_inbound(&update).unwrap();
        assert_eq!(inbound.media[0].mime_type, "application/pdf");
        assert_eq!(inbound.media[0].filename.as_deref(), Some("notes.pdf"));
    }

    #[test]
    fn extract_voice_defaults_mime() {
        let update = serde_json::json!({
            "message": {
                "chat": { "id": 5 },
                "voice": { "file_id": "v1" }
            }
        });

        let inbound = extract_inbound(&update).unwrap();
        assert_eq!(inbound.media[0].mime_type, "audio/ogg");
    }

    #[test]
    fn extract_sticker_is_unsupported() {
        let update = serde_json::json!({
            "message": {
                "chat": { "id": 5 },
                "sticker": { "file_id": "s1" }
            }
        });

        let inbound = extract_inbound(&update).unwrap();
        assert!(inbound.media.is_empty());
        assert_eq!(inbound.unsupported, vec!["sticker".to_string()]);
    }

    #[test]
    fn non_message_updates_are_skipped() {
        let update = serde_json::json!({
            "update_id": 3,
            "edited_message": { "chat": { "id": 5 }, "text": "edited" }
        });
        assert!(extract_inbound(&update).is_none());
    }

    #[test]
    fn allowlist_filters_chats() {
        let open = TelegramChannel::new("T", Vec::new());
        let restricted = TelegramChannel::new("T", vec![42]);

        assert!(open.is_chat_allowed(7));
        assert!(restricted.is_chat_allowed(42));
        assert!(!restricted.is_chat_allowed(7));
    }

    #[tokio::test]
    async fn send_posts_to_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": 9, "text": "hi there"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        channel_for(&server).send(9, "hi there").await.unwrap();
    }

    #[tokio::test]
    async fn send_failure_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bot was blocked"))
            .mount(&server)
            .await;

        let err = channel_for(&server).send(9, "hi").await.unwrap_err();
        match err {
            ChannelError::Send { status, message } => {
                assert_eq!(status, 403);
                assert!(message.contains("blocked"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn download_file_follows_get_file_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getFile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": { "file_id": "f1", "file_path": "photos/p.jpg" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/botTOKEN/photos/p.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
            .mount(&server)
            .await;

        let bytes = channel_for(&server).download_file("f1").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn download_without_file_path_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getFile"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": false})),
            )
            .mount(&server)
            .await;

        let err = channel_for(&server).download_file("f1").await.unwrap_err();
        assert!(matches!(err, ChannelError::Download(_)));
    }
}
