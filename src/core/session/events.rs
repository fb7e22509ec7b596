//! Session event channel and adapter callback glue.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::stt::{SttError, SttResult, Utterance, UtteranceAssembler};
use crate::core::tts::{AudioCallback, TtsError};

/// Events serialized through the session's single-consumer loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A complete final utterance from the speech service.
    Transcript(Utterance),
    /// The TTS adapter reported all queued audio emitted.
    TtsDrained,
    /// An adapter ended unexpectedly; the session must clean up.
    AdapterClosed(String),
    /// Energy-based barge-in fired (feature `audio-barge-in`).
    #[allow(dead_code)]
    ActivityInterrupt,
}

/// STT result callback: assemble fragments, forward complete utterances.
pub(super) fn stt_result_handler(
    assembler: Arc<UtteranceAssembler>,
    event_tx: mpsc::Sender<SessionEvent>,
) -> crate::core::stt::SttResultCallback {
    Arc::new(move |result: SttResult| {
        let assembler = assembler.clone();
        let event_tx = event_tx.clone();
        Box::pin(async move {
            if let Some(utterance) = assembler.push(&result) {
                if event_tx.send(SessionEvent::Transcript(utterance)).await.is_err() {
                    debug!("session loop gone, dropping transcript");
                }
            }
        }) as Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    })
}

/// STT error callback: adapter teardown reaches the loop, transient faults
/// are logged.
pub(super) fn stt_error_handler(
    event_tx: mpsc::Sender<SessionEvent>,
) -> crate::core::stt::SttErrorCallback {
    Arc::new(move |error: SttError| {
        let event_tx = event_tx.clone();
        Box::pin(async move {
            match error {
                SttError::AdapterClosed => {
                    let _ = event_tx
                        .send(SessionEvent::AdapterClosed("stt".to_string()))
                        .await;
                }
                other => warn!("transient STT error: {}", other),
            }
        }) as Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    })
}

/// TTS callback: frames go straight through the gate (hot path, no loop
/// hop); the drain signal is serialized through the loop.
pub(super) struct SessionTtsCallback {
    pub(super) session: std::sync::Weak<super::Session>,
    pub(super) event_tx: mpsc::Sender<SessionEvent>,
}

impl AudioCallback for SessionTtsCallback {
    fn on_audio(&self, frame: Bytes) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        let session = self.session.upgrade();
        Box::pin(async move {
            if let Some(session) = session {
                session.on_tts_frame(&frame);
            }
        })
    }

    fn on_flushed(&self) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        let event_tx = self.event_tx.clone();
        Box::pin(async move {
            if event_tx.send(SessionEvent::TtsDrained).await.is_err() {
                debug!("session loop gone, dropping drain signal");
            }
        })
    }

    fn on_error(&self, error: TtsError) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        let event_tx = self.event_tx.clone();
        Box::pin(async move {
            match error {
                TtsError::AdapterClosed => {
                    let _ = event_tx
                        .send(SessionEvent::AdapterClosed("tts".to_string()))
                        .await;
                }
                other => warn!("transient TTS error: {}", other),
            }
        })
    }
}
