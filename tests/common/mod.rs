//! Mock adapters and helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dialflow::core::SpeechFactory;
use dialflow::core::gatekeeper::{GateAdvice, ResponseGatekeeper};
use dialflow::core::llm::{ChatRequest, LanguageModel, LlmError, LlmEvent, ToolDispatch};
use dialflow::core::registry::SessionRegistry;
use dialflow::core::session::{Session, SessionContext, SessionParams, SessionRole};
use dialflow::core::stt::{BaseStt, SttError, SttErrorCallback, SttResultCallback};
use dialflow::core::tts::{AudioCallback, BaseTts, TtsError, TtsResult};
use dialflow::telephony::{OutboundSink, TelephonyError, UplinkFrame};

// ---------------------------------------------------------------------------
// Outbound sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<UplinkFrame>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<UplinkFrame> {
        self.frames.lock().clone()
    }

    pub fn media_count(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| matches!(f, UplinkFrame::Media { .. }))
            .count()
    }

    pub fn clear_count(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| matches!(f, UplinkFrame::Clear { .. }))
            .count()
    }

    pub fn dtmf_digits(&self) -> String {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                UplinkFrame::Dtmf { digit, .. } => Some(*digit),
                _ => None,
            })
            .collect()
    }
}

impl OutboundSink for RecordingSink {
    fn send_frame(&self, frame: UplinkFrame) -> Result<(), TelephonyError> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Speech adapters
// ---------------------------------------------------------------------------

/// Counters shared between a mock adapter and the test body.
#[derive(Default)]
pub struct AdapterProbe {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub audio_bytes: AtomicUsize,
}

pub struct MockStt {
    probe: Arc<AdapterProbe>,
    connected: AtomicBool,
}

impl MockStt {
    pub fn new(probe: Arc<AdapterProbe>) -> Self {
        Self {
            probe,
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl BaseStt for MockStt {
    async fn connect(&mut self) -> Result<(), SttError> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SttError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_audio(&mut self, audio_data: Bytes) -> Result<(), SttError> {
        if !self.is_ready() {
            return Err(SttError::AdapterClosed);
        }
        self.probe.audio_bytes.fetch_add(audio_data.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn on_result(&mut self, _callback: SttResultCallback) -> Result<(), SttError> {
        Ok(())
    }

    async fn on_error(&mut self, _callback: SttErrorCallback) -> Result<(), SttError> {
        Ok(())
    }

    fn get_provider_info(&self) -> &'static str {
        "MockSTT"
    }
}

/// Mock TTS that synthesizes one 160-byte frame per text chunk and reports
/// drained on flush.
pub struct MockTts {
    probe: Arc<AdapterProbe>,
    pub sent: Arc<Mutex<Vec<String>>>,
    pub clears: Arc<AtomicUsize>,
    callback: Arc<Mutex<Option<Arc<dyn AudioCallback>>>>,
    connected: AtomicBool,
}

impl MockTts {
    pub fn new(
        probe: Arc<AdapterProbe>,
        sent: Arc<Mutex<Vec<String>>>,
        clears: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            probe,
            sent,
            clears,
            callback: Arc::new(Mutex::new(None)),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl BaseTts for MockTts {
    async fn connect(&mut self) -> TtsResult<()> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> TtsResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_text(&mut self, chunk: &str) -> TtsResult<()> {
        self.sent.lock().push(chunk.to_string());
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.on_audio(Bytes::from(vec![0x20u8; 160])).await;
        }
        Ok(())
    }

    async fn flush(&mut self) -> TtsResult<()> {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.on_flushed().await;
        }
        Ok(())
    }

    async fn clear(&mut self) -> TtsResult<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_audio(&mut self, callback: Arc<dyn AudioCallback>) -> TtsResult<()> {
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn get_provider_info(&self) -> &'static str {
        "MockTTS"
    }
}

// ---------------------------------------------------------------------------
// Language service
// ---------------------------------------------------------------------------

/// One step of a scripted generation.
#[derive(Clone)]
pub enum Step {
    Event(LlmEvent),
    Wait(u64),
}

/// Script for one spoken reply: start, one delta, finish.
pub fn reply_script(text: &str) -> Vec<Step> {
    vec![
        Step::Event(LlmEvent::Start),
        Step::Event(LlmEvent::TextDelta {
            id: "0".to_string(),
            text: text.to_string(),
        }),
        Step::Event(LlmEvent::Finish {
            reason: "stop".to_string(),
        }),
    ]
}

pub struct MockLlm {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    pub calls: AtomicUsize,
    pub completion: Mutex<Option<String>>,
}

impl MockLlm {
    pub fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            calls: AtomicUsize::new(0),
            completion: Mutex::new(None),
        })
    }

    /// A single-reply script: start, one delta, finish.
    pub fn single_reply(text: &str) -> Arc<Self> {
        Self::new(vec![reply_script(text)])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LanguageModel for MockLlm {
    async fn stream_chat(
        &self,
        _request: ChatRequest,
        _executor: Arc<dyn ToolDispatch>,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<LlmEvent>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().pop_front().unwrap_or_else(|| {
            vec![
                Step::Event(LlmEvent::Start),
                Step::Event(LlmEvent::Finish {
                    reason: "stop".to_string(),
                }),
            ]
        });

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for step in script {
                if token.is_cancelled() {
                    let _ = tx.send(LlmEvent::Abort).await;
                    return;
                }
                match step {
                    Step::Event(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Step::Wait(ms) => {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                            _ = token.cancelled() => {
                                let _ = tx.send(LlmEvent::Abort).await;
                                return;
                            }
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, LlmError> {
        self.completion
            .lock()
            .clone()
            .ok_or_else(|| LlmError::ProviderError("no completion scripted".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Gatekeeper
// ---------------------------------------------------------------------------

pub struct ScriptedGatekeeper {
    advices: Mutex<VecDeque<GateAdvice>>,
    pub consults: AtomicUsize,
}

impl ScriptedGatekeeper {
    pub fn new(advices: Vec<GateAdvice>) -> Arc<Self> {
        Arc::new(Self {
            advices: Mutex::new(advices.into_iter().collect()),
            consults: AtomicUsize::new(0),
        })
    }

    pub fn respond(reason: &str) -> GateAdvice {
        GateAdvice {
            respond: true,
            reason: reason.to_string(),
            confidence: 0.9,
        }
    }
}

#[async_trait::async_trait]
impl ResponseGatekeeper for ScriptedGatekeeper {
    async fn advise(
        &self,
        _recent: &[dialflow::core::conversation::Message],
        _last_speaker: dialflow::core::conversation::Speaker,
    ) -> GateAdvice {
        self.consults.fetch_add(1, Ordering::SeqCst);
        self.advices
            .lock()
            .pop_front()
            .unwrap_or_else(|| GateAdvice::silent("script exhausted"))
    }
}

// ---------------------------------------------------------------------------
// Speech factory (used for conference shared TTS)
// ---------------------------------------------------------------------------

pub struct MockSpeechFactory {
    pub stt_probe: Arc<AdapterProbe>,
    pub tts_probe: Arc<AdapterProbe>,
    pub tts_sent: Arc<Mutex<Vec<String>>>,
    pub tts_clears: Arc<AtomicUsize>,
}

impl MockSpeechFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stt_probe: Arc::new(AdapterProbe::default()),
            tts_probe: Arc::new(AdapterProbe::default()),
            tts_sent: Arc::new(Mutex::new(Vec::new())),
            tts_clears: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl SpeechFactory for MockSpeechFactory {
    fn make_stt(&self, _diarize: bool) -> Result<Box<dyn BaseStt>, SttError> {
        Ok(Box::new(MockStt::new(self.stt_probe.clone())))
    }

    fn make_tts(&self) -> Result<Box<dyn BaseTts>, TtsError> {
        Ok(Box::new(MockTts::new(
            self.tts_probe.clone(),
            self.tts_sent.clone(),
            self.tts_clears.clone(),
        )))
    }
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

pub fn test_context(llm: Arc<MockLlm>) -> SessionContext {
    SessionContext {
        llm,
        telephony: None,
        calendar: None,
        appointments: None,
        owner_phone_number: None,
        public_base_url: None,
        system_prompt: "test agent".to_string(),
    }
}

pub struct SessionHandles {
    pub session: Arc<Session>,
    pub sink: Arc<RecordingSink>,
    pub stt_probe: Arc<AdapterProbe>,
    pub tts_probe: Arc<AdapterProbe>,
    pub tts_sent: Arc<Mutex<Vec<String>>>,
    pub tts_clears: Arc<AtomicUsize>,
}

pub async fn spawn_session(
    registry: &Arc<SessionRegistry>,
    stream_sid: &str,
    role: SessionRole,
) -> SessionHandles {
    let sink = Arc::new(RecordingSink::default());
    let stt_probe = Arc::new(AdapterProbe::default());
    let tts_probe = Arc::new(AdapterProbe::default());
    let tts_sent = Arc::new(Mutex::new(Vec::new()));
    let tts_clears = Arc::new(AtomicUsize::new(0));

    let session = registry
        .create(
            SessionParams {
                stream_sid: stream_sid.to_string(),
                call_sid: format!("CA-{stream_sid}"),
                caller: Some("+15550001111".to_string()),
                role,
                appointment_id: None,
            },
            Box::new(MockStt::new(stt_probe.clone())),
            Box::new(MockTts::new(
                tts_probe.clone(),
                tts_sent.clone(),
                tts_clears.clone(),
            )),
            sink.clone(),
        )
        .await
        .expect("session create");

    SessionHandles {
        session,
        sink,
        stt_probe,
        tts_probe,
        tts_sent,
        tts_clears,
    }
}

/// Poll until `cond` holds, up to two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
