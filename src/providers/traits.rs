use crate::chat::{ChatSettings, ContentPart, Role};
use crate::error::ModelError;
use async_trait::async_trait;

/// Which tool family the model may use for a request. The orchestrator
/// derives this from whether any file part is present; the policy of what
/// each set means lives with the model client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSet {
    /// Text-only request: search grounding is allowed.
    Standard,
    /// At least one file part in the request: media-safe tools only.
    Media,
}

/// One role-tagged content block of an outbound model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContent {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

/// Handle to a file the model backend has accepted and activated.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub uri: String,
    pub mime_type: String,
}

/// Generative model backend. The orchestrator treats calls as opaque and
/// synchronous from its perspective; implementations may suspend freely.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run one generation over the assembled content list.
    async fn generate(
        &self,
        contents: &[RequestContent],
        tools: ToolSet,
        settings: &ChatSettings,
    ) -> Result<String, ModelError>;

    /// Upload media bytes and wait until the backend has activated them.
    async fn upload_file(&self, bytes: Vec<u8>, mime_type: &str) -> Result<FileHandle, ModelError>;
}
