//! The per-call session orchestrator.
//!
//! A session owns the call's state machine, conversation, audio gate,
//! STT/TTS handles and the per-generation cancellation scope. Five event
//! sources (inbound audio, STT results, TTS audio, TTS drain, LLM events)
//! feed it; state mutations are serialized through a single-consumer event
//! loop so no two tasks touch call state concurrently.

mod audio;
mod events;
mod generation;
mod lifecycle;
mod transfer;

pub use events::SessionEvent;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::{Mutex, RwLock as SyncRwLock};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::appointments::{AppointmentPatch, AppointmentStore};
use crate::core::call_state::CallStateMachine;
use crate::core::calendar::CalendarService;
use crate::core::conference::ConferenceCoordinator;
use crate::core::conversation::Conversation;
use crate::core::gate::AudioGate;
use crate::core::llm::LanguageModel;
use crate::core::registry::SessionRegistry;
use crate::core::stt::{BaseStt, UtteranceAssembler};
use crate::core::tts::BaseTts;
use crate::telephony::{OutboundSink, TelephonyClient};

#[cfg(feature = "audio-barge-in")]
use crate::core::barge_in::BargeInDetector;

/// Event channel depth. Transcript and drain events are rare; a small
/// buffer absorbs bursts without unbounded growth.
pub(super) const EVENT_CHANNEL_SIZE: usize = 32;

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
    #[error("Invalid DTMF digit '{0}'")]
    InvalidDigit(char),
    #[error("STT error: {0}")]
    Stt(#[from] crate::core::stt::SttError),
    #[error("TTS error: {0}")]
    Tts(#[from] crate::core::tts::TtsError),
    #[error("Telephony error: {0}")]
    Telephony(#[from] crate::telephony::TelephonyError),
    #[error("Transfer failed: {0}")]
    TransferFailed(String),
}

/// Which leg of a call this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Solo,
    Caller,
    Owner,
}

/// Process-wide collaborators injected into every session.
///
/// Constructed once at startup; sessions never build their own provider
/// clients.
#[derive(Clone)]
pub struct SessionContext {
    pub llm: Arc<dyn LanguageModel>,
    pub telephony: Option<Arc<TelephonyClient>>,
    pub calendar: Option<Arc<dyn CalendarService>>,
    pub appointments: Option<Arc<dyn AppointmentStore>>,
    pub owner_phone_number: Option<String>,
    pub public_base_url: Option<String>,
    pub system_prompt: String,
}

pub struct Session {
    pub(super) stream_sid: String,
    pub(super) call_sid: String,
    /// Caller identity from the start frame, when the dialer passed one.
    pub(super) caller: Option<String>,
    pub(super) role: SyncRwLock<SessionRole>,
    pub(super) appointment_id: Option<String>,

    pub(super) state: CallStateMachine,
    pub(super) conversation: SyncRwLock<Conversation>,
    pub(super) gate: AudioGate,

    pub(super) stt: RwLock<Box<dyn BaseStt>>,
    pub(super) tts: RwLock<Box<dyn BaseTts>>,
    pub(super) sink: SyncRwLock<Arc<dyn OutboundSink>>,
    pub(super) assembler: Arc<UtteranceAssembler>,

    #[cfg(feature = "audio-barge-in")]
    pub(super) barge_in: BargeInDetector,

    pub(super) ctx: SessionContext,
    pub(super) registry: std::sync::Weak<SessionRegistry>,

    /// Cancelled on cleanup; parent of every generation scope.
    pub(super) root_token: CancellationToken,
    pub(super) generation_token: Mutex<Option<CancellationToken>>,

    pub(super) event_tx: mpsc::Sender<SessionEvent>,
    pub(super) event_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,

    pub(super) conference: SyncRwLock<Option<Arc<ConferenceCoordinator>>>,
    /// Briefing loaded from the bound appointment, appended to the system
    /// prompt of every generation.
    pub(super) appointment_context: SyncRwLock<Option<String>>,
    /// Outcome retained for a retry on cleanup when persistence fails.
    pub(super) pending_outcome: Mutex<Option<AppointmentPatch>>,

    pub(super) hangup_requested: AtomicBool,
    /// Set while a conference transfer is in flight so the stream's stop
    /// frame does not tear the session down before the reconnect.
    pub(super) transferring: AtomicBool,
    pub(super) cleaned_up: AtomicBool,
}

/// Everything the registry needs to build a session.
pub struct SessionParams {
    pub stream_sid: String,
    pub call_sid: String,
    pub caller: Option<String>,
    pub role: SessionRole,
    pub appointment_id: Option<String>,
}

impl Session {
    pub(crate) fn new(
        params: SessionParams,
        stt: Box<dyn BaseStt>,
        tts: Box<dyn BaseTts>,
        sink: Arc<dyn OutboundSink>,
        ctx: SessionContext,
        registry: std::sync::Weak<SessionRegistry>,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        Arc::new(Self {
            gate: AudioGate::new(params.stream_sid.clone(), sink.clone()),
            stream_sid: params.stream_sid,
            call_sid: params.call_sid,
            caller: params.caller,
            role: SyncRwLock::new(params.role),
            appointment_id: params.appointment_id,
            state: CallStateMachine::new(),
            conversation: SyncRwLock::new(Conversation::new()),
            stt: RwLock::new(stt),
            tts: RwLock::new(tts),
            sink: SyncRwLock::new(sink),
            assembler: Arc::new(UtteranceAssembler::new()),
            #[cfg(feature = "audio-barge-in")]
            barge_in: BargeInDetector::new(),
            ctx,
            registry,
            root_token: CancellationToken::new(),
            generation_token: Mutex::new(None),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            conference: SyncRwLock::new(None),
            appointment_context: SyncRwLock::new(None),
            pending_outcome: Mutex::new(None),
            hangup_requested: AtomicBool::new(false),
            transferring: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
        })
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    pub fn role(&self) -> SessionRole {
        *self.role.read()
    }

    pub fn set_role(&self, role: SessionRole) {
        *self.role.write() = role;
    }

    pub fn appointment_id(&self) -> Option<&str> {
        self.appointment_id.as_deref()
    }

    pub fn state(&self) -> crate::core::call_state::CallState {
        self.state.current()
    }

    pub fn state_machine(&self) -> &CallStateMachine {
        &self.state
    }

    pub fn gate(&self) -> &AudioGate {
        &self.gate
    }

    /// Run `f` against the conversation under its lock.
    pub fn with_conversation<T>(&self, f: impl FnOnce(&mut Conversation) -> T) -> T {
        f(&mut self.conversation.write())
    }

    pub fn conference(&self) -> Option<Arc<ConferenceCoordinator>> {
        self.conference.read().clone()
    }

    pub fn set_conference(&self, coordinator: Option<Arc<ConferenceCoordinator>>) {
        let in_conference = coordinator.is_some();
        *self.conference.write() = coordinator;
        self.conversation.write().set_conference_mode(in_conference);
    }

    pub fn is_transferring(&self) -> bool {
        self.transferring.load(std::sync::atomic::Ordering::Acquire)
    }
}
