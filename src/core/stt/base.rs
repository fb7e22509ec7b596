use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Result structure containing transcription data from STT providers
#[derive(Debug, Clone, PartialEq)]
pub struct SttResult {
    /// The transcribed text from the audio
    pub transcript: String,
    /// Whether this is a final transcription result (not an interim result)
    pub is_final: bool,
    /// Whether this marks the end of a speech segment
    pub is_speech_final: bool,
    /// Raw diarization id of the leading word, when diarization is enabled
    pub speaker_id: Option<u32>,
    /// Confidence score of the transcription (0.0 to 1.0)
    pub confidence: f32,
}

impl SttResult {
    pub fn new(
        transcript: String,
        is_final: bool,
        is_speech_final: bool,
        speaker_id: Option<u32>,
        confidence: f32,
    ) -> Self {
        Self {
            transcript,
            is_final,
            is_speech_final,
            speaker_id,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Configuration for STT providers.
///
/// Defaults match the telephony codec: μ-law, 8 kHz, mono, with a 500 ms
/// endpointing window.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct SttConfig {
    /// API key for the STT provider
    pub api_key: String,
    /// Model to use for transcription
    pub model: String,
    /// Language code for transcription (e.g., "en-US")
    pub language: String,
    /// Encoding of the audio
    pub encoding: String,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
    /// Number of audio channels
    pub channels: u16,
    /// Endpointing silence threshold in milliseconds
    pub endpointing_ms: u32,
    /// Enable speaker diarization (conference calls)
    pub diarize: bool,
    /// Enable punctuation in results
    pub punctuation: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "nova-3".to_string(),
            language: "en-US".to_string(),
            encoding: "mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
            endpointing_ms: 500,
            diarize: false,
            punctuation: true,
        }
    }
}

/// Error types for STT operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Adapter closed")]
    AdapterClosed,
}

/// Type alias for STT result callback
pub type SttResultCallback =
    Arc<dyn Fn(SttResult) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type alias for STT error callback
pub type SttErrorCallback =
    Arc<dyn Fn(SttError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Base trait for Speech-to-Text providers
#[async_trait::async_trait]
pub trait BaseStt: Send + Sync {
    /// Connect to the STT provider
    async fn connect(&mut self) -> Result<(), SttError>;

    /// Disconnect from the STT provider
    async fn disconnect(&mut self) -> Result<(), SttError>;

    /// Check if the connection is ready to be used
    fn is_ready(&self) -> bool;

    /// Send audio data to the STT provider for transcription
    async fn send_audio(&mut self, audio_data: bytes::Bytes) -> Result<(), SttError>;

    /// Register a callback triggered when transcription results arrive
    async fn on_result(&mut self, callback: SttResultCallback) -> Result<(), SttError>;

    /// Register a callback triggered when streaming errors occur.
    ///
    /// This is how post-connection faults (rate limits, stream teardown)
    /// reach the session.
    async fn on_error(&mut self, callback: SttErrorCallback) -> Result<(), SttError>;

    /// Get provider-specific information
    fn get_provider_info(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stt_result_confidence_clamping() {
        let result = SttResult::new("Test".to_string(), true, false, None, 1.5);
        assert_eq!(result.confidence, 1.0);

        let result = SttResult::new("Test".to_string(), true, false, None, -0.5);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_stt_config_defaults_match_telephony_codec() {
        let config = SttConfig::default();
        assert_eq!(config.encoding, "mulaw");
        assert_eq!(config.sample_rate, 8000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.endpointing_ms, 500);
        assert!(!config.diarize);
    }
}
