use super::traits::{FileHandle, ModelClient, RequestContent, ToolSet};
use crate::chat::{ChatSettings, ContentPart, Role, ThinkingMode};
use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const MAX_OUTPUT_TOKENS: u32 = 8192;
const EXTENDED_THINKING_BUDGET: i32 = 24_576;

/// Uploaded files are polled until the backend reports them active;
/// a bounded wait so a stuck file fails the request instead of hanging it.
const FILE_ACTIVATION_ATTEMPTS: u32 = 15;
const FILE_ACTIVATION_DELAY: Duration = Duration::from_secs(2);

// ─── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "fileData", skip_serializing_if = "Option::is_none")]
    file_data: Option<WireFileData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFileData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(rename = "fileUri")]
    file_uri: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "thinkingConfig", skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "thinkingBudget")]
    thinking_budget: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: WireFile,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    name: String,
    uri: String,
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

// ─── Client ─────────────────────────────────────────────────────────────────

/// Gemini REST client: `generateContent` plus the Files API for media.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    activation_delay: Duration,
}

fn build_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            client: build_client(),
            api_key: api_key.into(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            activation_delay: FILE_ACTIVATION_DELAY,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/v1beta/files?uploadType=media&key={}",
            self.base_url, self.api_key
        )
    }

    fn file_url(&self, name: &str) -> String {
        format!("{}/v1beta/{}?key={}", self.base_url, name, self.api_key)
    }

    fn build_request(
        contents: &[RequestContent],
        tools: ToolSet,
        settings: &ChatSettings,
    ) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: contents.iter().map(to_wire_content).collect(),
            tools: build_tools(tools),
            generation_config: build_generation_config(settings.thinking),
        }
    }

    fn extract_text(response: &GenerateContentResponse) -> Option<String> {
        let text = response
            .candidates
            .as_ref()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        if text.is_empty() { None } else { Some(text) }
    }

    async fn wait_for_activation(&self, file: WireFile) -> Result<WireFile, ModelError> {
        if file.state.as_deref() != Some("PROCESSING") {
            return check_terminal_state(file);
        }

        let name = file.name.clone();
        for _attempt in 1..=FILE_ACTIVATION_ATTEMPTS {
            tokio::time::sleep(self.activation_delay).await;

            let response = self
                .client
                .get(self.file_url(&name))
                .send()
                .await
                .map_err(|err| ModelError::Upload(err.to_string()))?;
            if !response.status().is_success() {
                return Err(ModelError::Upload(format!(
                    "file poll failed with status {}",
                    response.status()
                )));
            }
            let polled: WireFile = response
                .json()
                .await
                .map_err(|err| ModelError::Upload(err.to_string()))?;

            if polled.state.as_deref() != Some("PROCESSING") {
                return check_terminal_state(polled);
            }
            tracing::debug!(file = name.as_str(), "uploaded file still processing");
        }

        Err(ModelError::FileActivation {
            name,
            attempts: FILE_ACTIVATION_ATTEMPTS,
        })
    }
}

fn check_terminal_state(file: WireFile) -> Result<WireFile, ModelError> {
    match file.state.as_deref() {
        // Absent state means the backend considers the file ready.
        Some("ACTIVE") | None => Ok(file),
        Some(other) => Err(ModelError::Upload(format!(
            "file {} entered state {other}",
            file.name
        ))),
    }
}

fn to_wire_content(content: &RequestContent) -> WireContent {
    let role = match content.role {
        Role::User => "user",
        Role::Model => "model",
    };
    WireContent {
        role: Some(role.to_string()),
        parts: content
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { content } => WirePart {
                    text: Some(content.clone()),
                    ..WirePart::default()
                },
                ContentPart::File { uri, mime_type } => WirePart {
                    file_data: Some(WireFileData {
                        mime_type: mime_type.clone(),
                        file_uri: uri.clone(),
                    }),
                    ..WirePart::default()
                },
            })
            .collect(),
    }
}

fn build_tools(tools: ToolSet) -> Option<Vec<Value>> {
    match tools {
        ToolSet::Standard => Some(vec![serde_json::json!({ "google_search": {} })]),
        // Search grounding is rejected alongside file parts.
        ToolSet::Media => None,
    }
}

fn build_generation_config(thinking: ThinkingMode) -> GenerationConfig {
    let thinking_config = match thinking {
        ThinkingMode::Off => Some(ThinkingConfig { thinking_budget: 0 }),
        ThinkingMode::Balanced => None,
        ThinkingMode::Extended => Some(ThinkingConfig {
            thinking_budget: EXTENDED_THINKING_BUDGET,
        }),
    };
    GenerationConfig {
        max_output_tokens: MAX_OUTPUT_TOKENS,
        thinking_config,
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(
        &self,
        contents: &[RequestContent],
        tools: ToolSet,
        settings: &ChatSettings,
    ) -> Result<String, ModelError> {
        let request = Self::build_request(contents, tools, settings);

        let response = self
            .client
            .post(self.generate_url())
            .json(&request)
            .send()
            .await
            .map_err(|err| ModelError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|err| format!("<failed to read response body: {err}>"));
            return Err(ModelError::Request(format!("status {status}: {body}")));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| ModelError::Request(err.to_string()))?;

        Self::extract_text(&parsed).ok_or(ModelError::EmptyResponse)
    }

    async fn upload_file(&self, bytes: Vec<u8>, mime_type: &str) -> Result<FileHandle, ModelError> {
        let response = self
            .client
            .post(self.upload_url())
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|err| ModelError::Upload(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|err| format!("<failed to read response body: {err}>"));
            return Err(ModelError::Upload(format!("status {status}: {body}")));
        }

        let envelope: FileEnvelope = response
            .json()
            .await
            .map_err(|err| ModelError::Upload(err.to_string()))?;

        let active = self.wait_for_activation(envelope.file).await?;
        Ok(FileHandle {
            uri: active.uri,
            mime_type: active.mime_type.unwrap_or_else(|| mime_type.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatSettings, ThinkingMode};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        let mut client =
            GeminiClient::new("test-key", Some("gemini-test")).with_base_url(server.uri());
        client.activation_delay = Duration::ZERO;
        client
    }

    fn user_text(content: &str) -> RequestContent {
        RequestContent {
            role: Role::User,
            parts: vec![ContentPart::Text {
                content: content.into(),
            }],
        }
    }

    fn reply_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] }
            }]
        })
    }

    #[tokio::test]
    async fn generate_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("hello there")))
            .mount(&server)
            .await;

        let reply = client_for(&server)
            .generate(
                &[user_text("hi")],
                ToolSet::Standard,
                &ChatSettings::default(),
            )
            .await
            .unwrap();

        assert_eq!(reply, "hello there");
    }

    #[tokio::test]
    async fn generate_sends_search_tool_for_standard_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .and(body_partial_json(
                serde_json::json!({ "tools": [{ "google_search": {} }] }),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("grounded")))
            .mount(&server)
            .await;

        let reply = client_for(&server)
            .generate(
                &[user_text("what happened today?")],
                ToolSet::Standard,
                &ChatSettings::default(),
            )
            .await
            .unwrap();
        assert_eq!(reply, "grounded");
    }

    #[tokio::test]
    async fn generate_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(
                &[user_text("hi")],
                ToolSet::Standard,
                &ChatSettings::default(),
            )
            .await
            .unwrap_err();

        match err {
            ModelError::Request(message) => {
                assert!(message.contains("503"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn generate_without_candidates_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(
                &[user_text("hi")],
                ToolSet::Standard,
                &ChatSettings::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::EmptyResponse));
    }

    #[tokio::test]
    async fn upload_returns_handle_when_immediately_active() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "file": {
                    "name": "files/abc",
                    "uri": "https://files.example/abc",
                    "mimeType": "image/png",
                    "state": "ACTIVE"
                }
            })))
            .mount(&server)
            .await;

        let handle = client_for(&server)
            .upload_file(vec![1, 2, 3], "image/png")
            .await
            .unwrap();

        assert_eq!(handle.uri, "https://files.example/abc");
        assert_eq!(handle.mime_type, "image/png");
    }

    #[tokio::test]
    async fn upload_polls_until_active() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "file": {
                    "name": "files/slow",
                    "uri": "https://files.example/slow",
                    "state": "PROCESSING"
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "files/slow",
                "uri": "https://files.example/slow",
                "state": "PROCESSING"
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "files/slow",
                "uri": "https://files.example/slow",
                "mimeType": "video/mp4",
                "state": "ACTIVE"
            })))
            .mount(&server)
            .await;

        let handle = client_for(&server)
            .upload_file(vec![0; 16], "video/mp4")
            .await
            .unwrap();
        assert_eq!(handle.mime_type, "video/mp4");
    }

    #[tokio::test]
    async fn upload_times_out_after_bounded_polling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "file": {
                    "name": "files/stuck",
                    "uri": "https://files.example/stuck",
                    "state": "PROCESSING"
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/stuck"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "files/stuck",
                "uri": "https://files.example/stuck",
                "state": "PROCESSING"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .upload_file(vec![0; 16], "audio/ogg")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ModelError::FileActivation { attempts: 15, .. }
        ));
    }

    #[tokio::test]
    async fn failed_file_state_is_an_upload_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "file": {
                    "name": "files/bad",
                    "uri": "https://files.example/bad",
                    "state": "FAILED"
                }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .upload_file(vec![0; 16], "image/gif")
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Upload(_)));
    }

    #[test]
    fn thinking_modes_map_to_budgets() {
        assert_eq!(
            build_generation_config(ThinkingMode::Off)
                .thinking_config
                .unwrap()
                .thinking_budget,
            0
        );
        assert!(
            build_generation_config(ThinkingMode::Balanced)
                .thinking_config
                .is_none()
        );
        assert_eq!(
            build_generation_config(ThinkingMode::Extended)
                .thinking_config
                .unwrap()
                .thinking_budget,
            EXTENDED_THINKING_BUDGET
        );
    }

    #[test]
    fn file_parts_serialize_as_file_data() {
        let wire = to_wire_content(&RequestContent {
            role: Role::Model,
            parts: vec![ContentPart::File {
                uri: "files/x".into(),
                mime_type: "image/jpeg".into(),
            }],
        });

        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["role"], "model");
        assert_eq!(json["parts"][0]["fileData"]["fileUri"], "files/x");
        assert_eq!(json["parts"][0]["fileData"]["mimeType"], "image/jpeg");
    }
}
