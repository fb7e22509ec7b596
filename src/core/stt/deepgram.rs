//! Deepgram streaming STT client.
//!
//! A duplex WebSocket: μ-law audio goes up as binary frames, transcription
//! results come back as JSON. A background task owns the socket; audio is
//! forwarded through an unbounded channel so the ingress path never waits on
//! the network.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{
    BaseStt, SttConfig, SttError, SttErrorCallback, SttResult, SttResultCallback,
};

const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";
/// Keepalive interval while no audio is flowing.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    #[serde(rename = "type")]
    response_type: String,
    channel: Option<DeepgramChannel>,
    is_final: Option<bool>,
    speech_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    confidence: f32,
    words: Option<Vec<DeepgramWord>>,
}

#[derive(Debug, Deserialize)]
struct DeepgramWord {
    speaker: Option<u32>,
}

/// Deepgram STT WebSocket client
pub struct DeepgramStt {
    config: SttConfig,
    state: Arc<RwLock<ConnectionState>>,
    ws_sender: Option<mpsc::UnboundedSender<Message>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    result_callback: Arc<SyncRwLock<Option<SttResultCallback>>>,
    error_callback: Arc<SyncRwLock<Option<SttErrorCallback>>>,
    connection_handle: Option<tokio::task::JoinHandle<()>>,
}

impl DeepgramStt {
    pub fn new(config: SttConfig) -> Result<Self, SttError> {
        if config.api_key.is_empty() {
            return Err(SttError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            ws_sender: None,
            shutdown_tx: None,
            result_callback: Arc::new(SyncRwLock::new(None)),
            error_callback: Arc::new(SyncRwLock::new(None)),
            connection_handle: None,
        })
    }

    /// Build the WebSocket URL with query parameters
    fn build_websocket_url(config: &SttConfig) -> Result<String, SttError> {
        let mut url = Url::parse(DEEPGRAM_LISTEN_URL)
            .map_err(|e| SttError::ConfigurationError(format!("Invalid WebSocket URL: {e}")))?;

        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("model", &config.model);
            query_pairs.append_pair("language", &config.language);
            query_pairs.append_pair("encoding", &config.encoding);
            query_pairs.append_pair("sample_rate", &config.sample_rate.to_string());
            query_pairs.append_pair("channels", &config.channels.to_string());
            query_pairs.append_pair("punctuate", &config.punctuation.to_string());
            query_pairs.append_pair("interim_results", "true");
            query_pairs.append_pair("endpointing", &config.endpointing_ms.to_string());
            if config.diarize {
                query_pairs.append_pair("diarize", "true");
            }
        }

        Ok(url.to_string())
    }

    fn parse_result(text: &str) -> Result<Option<SttResult>, SttError> {
        let response: DeepgramResponse = serde_json::from_str(text)
            .map_err(|e| SttError::ProviderError(format!("Failed to parse response: {e}")))?;

        match response.response_type.as_str() {
            "Results" => {
                let Some(channel) = response.channel else {
                    return Ok(None);
                };
                let Some(alternative) = channel.alternatives.first() else {
                    return Ok(None);
                };
                let speaker_id = alternative
                    .words
                    .as_ref()
                    .and_then(|words| words.first())
                    .and_then(|word| word.speaker);
                Ok(Some(SttResult::new(
                    alternative.transcript.clone(),
                    response.is_final.unwrap_or(false),
                    response.speech_final.unwrap_or(false),
                    speaker_id,
                    alternative.confidence,
                )))
            }
            "Metadata" | "SpeechStarted" | "UtteranceEnd" => Ok(None),
            "Error" => Err(SttError::ProviderError(text.to_string())),
            other => {
                warn!("Unknown response type from Deepgram: {}", other);
                Ok(None)
            }
        }
    }

    async fn start_connection(&mut self) -> Result<(), SttError> {
        let ws_url = Self::build_websocket_url(&self.config)?;

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        self.ws_sender = Some(ws_tx);
        self.shutdown_tx = Some(shutdown_tx);

        let state = self.state.clone();
        let result_callback = self.result_callback.clone();
        let error_callback = self.error_callback.clone();
        let api_key = self.config.api_key.clone();

        let connection_handle = tokio::spawn(async move {
            {
                let mut state_guard = state.write().await;
                *state_guard = ConnectionState::Connecting;
            }

            let request = match tokio_tungstenite::tungstenite::http::Request::builder()
                .uri(&ws_url)
                .header("Authorization", format!("Token {api_key}"))
                .header("Host", "api.deepgram.com")
                .header("Upgrade", "websocket")
                .header("Connection", "Upgrade")
                .header(
                    "Sec-WebSocket-Key",
                    tokio_tungstenite::tungstenite::handshake::client::generate_key(),
                )
                .header("Sec-WebSocket-Version", "13")
                .body(())
            {
                Ok(req) => req,
                Err(e) => {
                    let mut state_guard = state.write().await;
                    *state_guard = ConnectionState::Error(format!("Bad request: {e}"));
                    return;
                }
            };

            let (ws_stream, _) = match connect_async(request).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Failed to connect to Deepgram: {}", e);
                    let mut state_guard = state.write().await;
                    *state_guard = ConnectionState::Error(format!("Connection failed: {e}"));
                    return;
                }
            };

            info!("Connected to Deepgram STT WebSocket");
            {
                let mut state_guard = state.write().await;
                *state_guard = ConnectionState::Connected;
            }

            let (mut ws_sink, mut ws_reader) = ws_stream.split();
            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);

            loop {
                tokio::select! {
                    Some(message) = ws_rx.recv() => {
                        if let Err(e) = ws_sink.send(message).await {
                            error!("Failed to send audio to Deepgram: {}", e);
                            break;
                        }
                    }

                    message = ws_reader.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                match Self::parse_result(&text) {
                                    Ok(Some(result)) => {
                                        let callback = result_callback.read().clone();
                                        if let Some(callback) = callback {
                                            callback(result).await;
                                        }
                                    }
                                    Ok(None) => {}
                                    Err(e) => {
                                        warn!("Deepgram stream error: {}", e);
                                        let callback = error_callback.read().clone();
                                        if let Some(callback) = callback {
                                            callback(e).await;
                                        }
                                    }
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("Deepgram closed the STT stream: {:?}", frame);
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("Deepgram STT WebSocket error: {}", e);
                                let callback = error_callback.read().clone();
                                if let Some(callback) = callback {
                                    callback(SttError::AdapterClosed).await;
                                }
                                break;
                            }
                            None => {
                                info!("Deepgram STT stream ended");
                                let callback = error_callback.read().clone();
                                if let Some(callback) = callback {
                                    callback(SttError::AdapterClosed).await;
                                }
                                break;
                            }
                        }
                    }

                    _ = keepalive.tick() => {
                        let keepalive_msg = Message::Text(r#"{"type":"KeepAlive"}"#.into());
                        if ws_sink.send(keepalive_msg).await.is_err() {
                            break;
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        debug!("Shutting down Deepgram STT connection");
                        let close_msg = Message::Text(r#"{"type":"CloseStream"}"#.into());
                        let _ = ws_sink.send(close_msg).await;
                        break;
                    }
                }
            }

            let mut state_guard = state.write().await;
            *state_guard = ConnectionState::Disconnected;
        });

        self.connection_handle = Some(connection_handle);

        // Wait for the connection to be established
        for _ in 0..50 {
            let state = self.state.read().await;
            match &*state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Error(e) => {
                    return Err(SttError::ConnectionFailed(e.clone()));
                }
                _ => {}
            }
            drop(state);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err(SttError::ConnectionFailed("Connection timeout".to_string()))
    }
}

#[async_trait::async_trait]
impl BaseStt for DeepgramStt {
    async fn connect(&mut self) -> Result<(), SttError> {
        self.start_connection().await
    }

    async fn disconnect(&mut self) -> Result<(), SttError> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = timeout(Duration::from_secs(5), handle).await;
        }
        self.ws_sender = None;
        self.shutdown_tx = None;
        {
            let mut state = self.state.write().await;
            *state = ConnectionState::Disconnected;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ws_sender.is_some()
    }

    async fn send_audio(&mut self, audio_data: bytes::Bytes) -> Result<(), SttError> {
        let sender = self.ws_sender.as_ref().ok_or(SttError::AdapterClosed)?;
        sender
            .send(Message::Binary(audio_data))
            .map_err(|_| SttError::AdapterClosed)
    }

    async fn on_result(&mut self, callback: SttResultCallback) -> Result<(), SttError> {
        *self.result_callback.write() = Some(callback);
        Ok(())
    }

    async fn on_error(&mut self, callback: SttErrorCallback) -> Result<(), SttError> {
        *self.error_callback.write() = Some(callback);
        Ok(())
    }

    fn get_provider_info(&self) -> &'static str {
        "Deepgram STT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_carries_telephony_codec() {
        let config = SttConfig {
            api_key: "key".to_string(),
            diarize: true,
            ..Default::default()
        };
        let url = DeepgramStt::build_websocket_url(&config).unwrap();
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?"));
        assert!(url.contains("encoding=mulaw"));
        assert!(url.contains("sample_rate=8000"));
        assert!(url.contains("channels=1"));
        assert!(url.contains("endpointing=500"));
        assert!(url.contains("diarize=true"));
    }

    #[test]
    fn test_url_omits_diarize_when_disabled() {
        let config = SttConfig {
            api_key: "key".to_string(),
            ..Default::default()
        };
        let url = DeepgramStt::build_websocket_url(&config).unwrap();
        assert!(!url.contains("diarize"));
    }

    #[test]
    fn test_empty_api_key_rejected() {
        assert!(DeepgramStt::new(SttConfig::default()).is_err());
    }

    #[test]
    fn test_parse_result_with_speaker() {
        let json = r#"{
            "type": "Results",
            "is_final": true,
            "speech_final": true,
            "channel": {
                "alternatives": [{
                    "transcript": "hello there",
                    "confidence": 0.98,
                    "words": [{"word": "hello", "speaker": 1}, {"word": "there", "speaker": 1}]
                }]
            }
        }"#;
        let result = DeepgramStt::parse_result(json).unwrap().unwrap();
        assert_eq!(result.transcript, "hello there");
        assert!(result.is_final);
        assert!(result.is_speech_final);
        assert_eq!(result.speaker_id, Some(1));
    }

    #[test]
    fn test_parse_metadata_ignored() {
        let json = r#"{"type": "Metadata"}"#;
        assert!(DeepgramStt::parse_result(json).unwrap().is_none());
    }

    #[test]
    fn test_parse_error_surfaces() {
        let json = r#"{"type": "Error", "description": "bad things"}"#;
        assert!(DeepgramStt::parse_result(json).is_err());
    }
}
