pub mod events;
pub mod openai;

pub use events::LlmEvent;
pub use openai::OpenAiChat;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::conversation::Message;

/// Error types for language service operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Cancelled")]
    Cancelled,
}

/// A tool exposed to the language service, with a strict input schema.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments.
    pub parameters: serde_json::Value,
}

/// Executes a named tool on behalf of the stream driver.
///
/// Implementations resolve the owning session through the registry by id,
/// never through a back-reference.
#[async_trait::async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, String>;
}

/// A generation request: prompt snapshot plus tool schemas.
#[derive(Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

/// The language service boundary.
///
/// `stream_chat` produces the typed event stream of [`LlmEvent`]s; the
/// driver must observe the cancellation token at every suspension point and
/// surface `Abort` when cancelled.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        executor: Arc<dyn ToolDispatch>,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<LlmEvent>, LlmError>;

    /// One-shot, non-streaming completion (used by the conference
    /// gatekeeper).
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}
