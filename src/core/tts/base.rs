//! Base trait abstraction for Text-to-Speech providers.
//!
//! The session streams text chunks in, receives synthesized μ-law frames
//! through the registered callback, and treats the `flushed` event as the
//! authoritative end of a spoken response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

/// TTS-specific error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Provider not ready: {0}")]
    ProviderNotReady(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Adapter closed")]
    AdapterClosed,
}

/// Result type for TTS operations
pub type TtsResult<T> = Result<T, TtsError>;

/// Configuration for TTS providers.
///
/// Defaults match the telephony codec: μ-law, 8 kHz.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct TtsConfig {
    /// API key for the TTS provider
    pub api_key: String,
    /// Voice model to use for synthesis
    pub model: String,
    /// Audio encoding
    pub encoding: String,
    /// Sample rate of the synthesized audio in Hz
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "aura-2-thalia-en".to_string(),
            encoding: "mulaw".to_string(),
            sample_rate: 8000,
        }
    }
}

/// Audio callback trait for handling TTS output.
pub trait AudioCallback: Send + Sync {
    /// Called for each synthesized audio frame.
    fn on_audio(&self, frame: Bytes) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Called when all previously queued audio has been emitted. This is the
    /// authoritative completion signal for a spoken response.
    fn on_flushed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Called when an error occurs during synthesis.
    fn on_error(&self, error: TtsError) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Base trait for Text-to-Speech providers
#[async_trait::async_trait]
pub trait BaseTts: Send + Sync {
    /// Connect to the TTS provider
    async fn connect(&mut self) -> TtsResult<()>;

    /// Disconnect from the TTS provider and release resources
    async fn disconnect(&mut self) -> TtsResult<()>;

    /// Check if the provider is ready to process requests
    fn is_ready(&self) -> bool;

    /// Queue a text chunk for synthesis
    async fn send_text(&mut self, chunk: &str) -> TtsResult<()>;

    /// Force processing of all queued text; the provider will answer with a
    /// `flushed` event once the resulting audio has been emitted
    async fn flush(&mut self) -> TtsResult<()>;

    /// Drop all queued text and pending audio
    async fn clear(&mut self) -> TtsResult<()>;

    /// Register the audio callback
    fn on_audio(&mut self, callback: Arc<dyn AudioCallback>) -> TtsResult<()>;

    /// Get provider-specific information
    fn get_provider_info(&self) -> &'static str;
}
