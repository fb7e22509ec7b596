//! Deepgram streaming TTS client.
//!
//! A duplex WebSocket: text chunks go up as JSON commands, synthesized
//! μ-law frames come back as binary messages. The provider's `Flushed`
//! message maps to the callback's `on_flushed`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{AudioCallback, BaseTts, TtsConfig, TtsError, TtsResult};

const DEEPGRAM_SPEAK_URL: &str = "wss://api.deepgram.com/v1/speak";

#[derive(Debug, Clone, PartialEq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

#[derive(Debug, Deserialize)]
struct SpeakEvent {
    #[serde(rename = "type")]
    event_type: String,
}

/// Deepgram TTS WebSocket client
pub struct DeepgramTts {
    config: TtsConfig,
    state: Arc<RwLock<ConnectionState>>,
    ws_sender: Option<mpsc::UnboundedSender<Message>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    audio_callback: Arc<SyncRwLock<Option<Arc<dyn AudioCallback>>>>,
    connection_handle: Option<tokio::task::JoinHandle<()>>,
}

impl DeepgramTts {
    pub fn new(config: TtsConfig) -> TtsResult<Self> {
        if config.api_key.is_empty() {
            return Err(TtsError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            ws_sender: None,
            shutdown_tx: None,
            audio_callback: Arc::new(SyncRwLock::new(None)),
            connection_handle: None,
        })
    }

    fn build_websocket_url(config: &TtsConfig) -> TtsResult<String> {
        let mut url = Url::parse(DEEPGRAM_SPEAK_URL)
            .map_err(|e| TtsError::InvalidConfiguration(format!("Invalid WebSocket URL: {e}")))?;
        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("model", &config.model);
            query_pairs.append_pair("encoding", &config.encoding);
            query_pairs.append_pair("sample_rate", &config.sample_rate.to_string());
        }
        Ok(url.to_string())
    }

    fn command(&self, payload: String) -> TtsResult<()> {
        let sender = self.ws_sender.as_ref().ok_or(TtsError::AdapterClosed)?;
        sender
            .send(Message::Text(payload.into()))
            .map_err(|_| TtsError::AdapterClosed)
    }

    async fn start_connection(&mut self) -> TtsResult<()> {
        let ws_url = Self::build_websocket_url(&self.config)?;

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        self.ws_sender = Some(ws_tx);
        self.shutdown_tx = Some(shutdown_tx);

        let state = self.state.clone();
        let audio_callback = self.audio_callback.clone();
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
                    error!("Failed to connect to Deepgram TTS: {}", e);
                    let mut state_guard = state.write().await;
                    *state_guard = ConnectionState::Error(format!("Connection failed: {e}"));
                    return;
                }
            };

            info!("Connected to Deepgram TTS WebSocket");
            {
                let mut state_guard = state.write().await;
                *state_guard = ConnectionState::Connected;
            }

            let (mut ws_sink, mut ws_reader) = ws_stream.split();

            loop {
                tokio::select! {
                    Some(message) = ws_rx.recv() => {
                        if let Err(e) = ws_sink.send(message).await {
                            error!("Failed to send to Deepgram TTS: {}", e);
                            break;
                        }
                    }

                    message = ws_reader.next() => {
                        match message {
                            Some(Ok(Message::Binary(data))) => {
                                let callback = audio_callback.read().clone();
                                if let Some(callback) = callback {
                                    callback.on_audio(Bytes::from(data)).await;
                                }
                            }
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<SpeakEvent>(&text) {
                                    Ok(event) => match event.event_type.as_str() {
                                        "Flushed" => {
                                            debug!("Deepgram TTS reports flushed");
                                            let callback = audio_callback.read().clone();
                                            if let Some(callback) = callback {
                                                callback.on_flushed().await;
                                            }
                                        }
                                        "Cleared" | "Metadata" => {}
                                        "Warning" | "Error" => {
                                            warn!("Deepgram TTS event: {}", text);
                                            let callback = audio_callback.read().clone();
                                            if let Some(callback) = callback {
                                                callback
                                                    .on_error(TtsError::ProviderError(text.to_string()))
                                                    .await;
                                            }
                                        }
                                        other => {
                                            debug!("Unknown TTS event type: {}", other);
                                        }
                                    },
                                    Err(e) => {
                                        warn!("Unparseable TTS event: {}", e);
                                    }
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("Deepgram closed the TTS stream: {:?}", frame);
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("Deepgram TTS WebSocket error: {}", e);
                                let callback = audio_callback.read().clone();
                                if let Some(callback) = callback {
                                    callback.on_error(TtsError::AdapterClosed).await;
                                }
                                break;
                            }
                            None => {
                                info!("Deepgram TTS stream ended");
                                break;
                            }
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        debug!("Shutting down Deepgram TTS connection");
                        let close_msg = Message::Text(r#"{"type":"Close"}"#.into());
                        let _ = ws_sink.send(close_msg).await;
                        break;
                    }
                }
            }

            let mut state_guard = state.write().await;
            *state_guard = ConnectionState::Disconnected;
        });

        self.connection_handle = Some(connection_handle);

        for _ in 0..50 {
            let state = self.state.read().await;
            match &*state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Error(e) => {
                    return Err(TtsError::ConnectionFailed(e.clone()));
                }
                _ => {}
            }
            drop(state);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err(TtsError::ConnectionFailed("Connection timeout".to_string()))
    }
}

#[async_trait::async_trait]
impl BaseTts for DeepgramTts {
    async fn connect(&mut self) -> TtsResult<()> {
        self.start_connection().await
    }

    async fn disconnect(&mut self) -> TtsResult<()> {
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

    async fn send_text(&mut self, chunk: &str) -> TtsResult<()> {
        let payload = serde_json::json!({"type": "Speak", "text": chunk}).to_string();
        self.command(payload)
    }

    async fn flush(&mut self) -> TtsResult<()> {
        self.command(r#"{"type":"Flush"}"#.to_string())
    }

    async fn clear(&mut self) -> TtsResult<()> {
        self.command(r#"{"type":"Clear"}"#.to_string())
    }

    fn on_audio(&mut self, callback: Arc<dyn AudioCallback>) -> TtsResult<()> {
        *self.audio_callback.write() = Some(callback);
        Ok(())
    }

    fn get_provider_info(&self) -> &'static str {
        "Deepgram TTS"
    }
}
