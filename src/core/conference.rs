//! Conference coordination: two human sessions, one shared AI voice.
//!
//! The coordinator pairs the caller and owner legs by stream sid and
//! resolves them through the registry on each use. Raw human audio is
//! cross-routed bypassing the peers' gates; AI audio from the single shared
//! TTS is fanned to both egress transports. Every final transcript is put
//! past the gatekeeper before the agent is allowed to speak.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::conversation::{ContentPart, Speaker, ToolResultEntry};
use crate::core::gatekeeper::ResponseGatekeeper;
use crate::core::llm::{ChatRequest, LanguageModel, LlmEvent};
use crate::core::registry::SessionRegistry;
use crate::core::session::{Session, SessionRole};
use crate::core::tools::{SessionToolExecutor, tool_specs};
use crate::core::tts::{AudioCallback, BaseTts, TtsError};
use crate::core::SpeechFactory;

/// Tracks conferences being set up and those running.
pub struct ConferenceManager {
    /// conference id -> caller stream sid, recorded at transfer time.
    pending: Mutex<HashMap<String, String>>,
    active: Mutex<HashMap<String, Arc<ConferenceCoordinator>>>,
}

impl ConferenceManager {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Called by the transferring session once the control plane accepted
    /// the conference rebuild.
    pub fn register_pending(&self, conference_id: &str, caller_sid: &str) {
        self.pending
            .lock()
            .insert(conference_id.to_string(), caller_sid.to_string());
    }

    /// Pair the owner leg with the waiting caller leg. Returns the
    /// coordinator once both sessions are bound.
    pub async fn pair_owner(
        self: &Arc<Self>,
        conference_id: &str,
        owner_sid: &str,
        registry: &Arc<SessionRegistry>,
        gatekeeper: Arc<dyn ResponseGatekeeper>,
        speech: Arc<dyn SpeechFactory>,
    ) -> Option<Arc<ConferenceCoordinator>> {
        let caller_sid = self.pending.lock().remove(conference_id)?;

        let caller = registry.get(&caller_sid)?;
        let owner = registry.get(owner_sid)?;

        let ctx = registry.context();
        let coordinator = Arc::new(ConferenceCoordinator {
            id: conference_id.to_string(),
            caller_sid: caller_sid.clone(),
            owner_sid: owner_sid.to_string(),
            registry: Arc::downgrade(registry),
            manager: Arc::downgrade(self),
            llm: ctx.llm.clone(),
            gatekeeper,
            speech,
            calendar: ctx.calendar.clone(),
            system_prompt: ctx.system_prompt.clone(),
            shared_tts: AsyncMutex::new(None),
            generation_lock: AsyncMutex::new(()),
            generation_token: Mutex::new(None),
            active: AtomicBool::new(true),
        });

        caller.set_role(SessionRole::Caller);
        owner.set_role(SessionRole::Owner);
        caller.set_conference(Some(coordinator.clone()));
        owner.set_conference(Some(coordinator.clone()));

        self.active
            .lock()
            .insert(conference_id.to_string(), coordinator.clone());
        info!(
            "conference {} paired: caller={} owner={}",
            conference_id, caller_sid, owner_sid
        );
        Some(coordinator)
    }

    pub fn get(&self, conference_id: &str) -> Option<Arc<ConferenceCoordinator>> {
        self.active.lock().get(conference_id).cloned()
    }

    /// Whether this conference id was issued by us and is still live,
    /// either waiting for its owner leg or already paired.
    pub fn is_known(&self, conference_id: &str) -> bool {
        self.pending.lock().contains_key(conference_id)
            || self.active.lock().contains_key(conference_id)
    }

    fn remove(&self, conference_id: &str) {
        self.active.lock().remove(conference_id);
        self.pending.lock().remove(conference_id);
    }
}

impl Default for ConferenceManager {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConferenceCoordinator {
    id: String,
    caller_sid: String,
    owner_sid: String,
    registry: Weak<SessionRegistry>,
    manager: Weak<ConferenceManager>,
    llm: Arc<dyn LanguageModel>,
    gatekeeper: Arc<dyn ResponseGatekeeper>,
    speech: Arc<dyn SpeechFactory>,
    calendar: Option<Arc<dyn crate::core::calendar::CalendarService>>,
    system_prompt: String,
    /// Created lazily on the first AI utterance.
    shared_tts: AsyncMutex<Option<Box<dyn BaseTts>>>,
    /// Serializes shared generations; a newer transcript cancels the token
    /// first, then waits its turn here.
    generation_lock: AsyncMutex<()>,
    generation_token: Mutex<Option<CancellationToken>>,
    active: AtomicBool,
}

impl ConferenceCoordinator {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn peer_of(&self, from_sid: &str) -> Option<Arc<Session>> {
        let peer_sid = if from_sid == self.caller_sid {
            &self.owner_sid
        } else {
            &self.caller_sid
        };
        self.registry.upgrade()?.get(peer_sid)
    }

    fn caller_session(&self) -> Option<Arc<Session>> {
        self.registry.upgrade()?.get(&self.caller_sid)
    }

    /// Forward a raw inbound frame to the other participant's egress,
    /// bypassing its gate: the humans must always hear each other.
    pub fn route_raw_audio(&self, from_sid: &str, frame: &Bytes) {
        if !self.is_active() {
            return;
        }
        if let Some(peer) = self.peer_of(from_sid) {
            peer.egress_raw(frame);
        }
    }

    /// A final transcript from either leg: append to the shared
    /// conversation, consult the gatekeeper, maybe speak.
    pub async fn on_transcript(&self, speaker: Speaker, text: &str) {
        if !self.is_active() {
            return;
        }
        let Some(caller) = self.caller_session() else {
            return;
        };

        caller.with_conversation(|conversation| conversation.append_user(text, Some(speaker)));
        let snapshot = caller.with_conversation(|conversation| conversation.snapshot());

        let advice = self.gatekeeper.advise(&snapshot, speaker).await;
        if !advice.respond {
            debug!("conference {}: staying silent ({})", self.id, advice.reason);
            return;
        }

        // Supersede any in-flight shared generation
        if let Some(token) = self.generation_token.lock().take() {
            token.cancel();
        }
        let _guard = self.generation_lock.lock().await;
        if !self.is_active() {
            return;
        }
        let token = CancellationToken::new();
        *self.generation_token.lock() = Some(token.clone());
        self.run_shared_generation(&caller, token).await;
    }

    /// One shared generation: text goes to the shared TTS, whose audio the
    /// callback fans to both legs.
    async fn run_shared_generation(&self, caller: &Arc<Session>, token: CancellationToken) {
        if let Err(e) = self.ensure_shared_tts().await {
            warn!("conference {}: shared TTS unavailable: {}", self.id, e);
            return;
        }

        let request = ChatRequest {
            system: self.system_prompt.clone(),
            messages: caller.with_conversation(|conversation| conversation.snapshot()),
            tools: tool_specs(),
        };
        let executor = Arc::new(SessionToolExecutor::new(
            self.registry.clone(),
            self.caller_sid.clone(),
            self.calendar.clone(),
        ));

        let mut llm_rx = match self.llm.stream_chat(request, executor, token).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("conference {}: language service unavailable: {}", self.id, e);
                return;
            }
        };

        caller.with_conversation(|conversation| conversation.start_assistant());
        let mut interrupted = false;

        while let Some(event) = llm_rx.recv().await {
            match event {
                LlmEvent::TextDelta { text, .. } => {
                    caller.with_conversation(|conversation| conversation.extend_assistant(&text));
                    let mut tts_guard = self.shared_tts.lock().await;
                    if let Some(tts) = tts_guard.as_mut() {
                        if let Err(e) = tts.send_text(&text).await {
                            warn!("shared TTS rejected delta: {}", e);
                        }
                    }
                }
                LlmEvent::ToolCall { id, name, args } => {
                    caller.with_conversation(|conversation| {
                        conversation.add_assistant_structured(vec![ContentPart::ToolCall {
                            id, name, args,
                        }])
                    });
                }
                LlmEvent::ToolResult { id, payload } => {
                    caller.with_conversation(|conversation| {
                        conversation.add_tool_results(vec![ToolResultEntry {
                            tool_call_id: id,
                            payload,
                        }])
                    });
                }
                LlmEvent::ToolError { id, message } => {
                    caller.with_conversation(|conversation| {
                        conversation.add_tool_results(vec![ToolResultEntry {
                            tool_call_id: id,
                            payload: json!({"error": message}),
                        }])
                    });
                }
                LlmEvent::Finish { .. } => break,
                LlmEvent::Error { message } => {
                    warn!("conference {} generation failed: {}", self.id, message);
                    break;
                }
                LlmEvent::Abort => {
                    interrupted = true;
                    break;
                }
                _ => {}
            }
        }

        {
            let mut tts_guard = self.shared_tts.lock().await;
            if let Some(tts) = tts_guard.as_mut() {
                if interrupted {
                    let _ = tts.clear().await;
                } else if let Err(e) = tts.flush().await {
                    warn!("shared TTS flush failed: {}", e);
                }
            }
        }
        caller.with_conversation(|conversation| {
            if interrupted {
                conversation.finish_assistant_interrupted();
            } else {
                conversation.finish_assistant();
            }
        });
    }

    async fn ensure_shared_tts(&self) -> Result<(), TtsError> {
        let mut tts_guard = self.shared_tts.lock().await;
        if tts_guard.is_some() {
            return Ok(());
        }
        let mut tts = self.speech.make_tts()?;
        tts.on_audio(Arc::new(ConferenceTtsCallback {
            coordinator_id: self.id.clone(),
            registry: self.registry.clone(),
            caller_sid: self.caller_sid.clone(),
            owner_sid: self.owner_sid.clone(),
        }))?;
        tts.connect().await?;
        *tts_guard = Some(tts);
        info!("conference {}: shared TTS created", self.id);
        Ok(())
    }

    /// One participant disconnected: the other reverts to solo mode and the
    /// shared resources go away. Participant sessions themselves are owned
    /// by the registry and are not destroyed here.
    pub async fn participant_left(&self, sid: &str) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("conference {}: participant {} left", self.id, sid);

        if let Some(token) = self.generation_token.lock().take() {
            token.cancel();
        }

        if let Some(peer) = self.peer_of(sid) {
            peer.set_conference(None);
            peer.set_role(SessionRole::Solo);
        }

        self.close_shared_tts().await;
        if let Some(manager) = self.manager.upgrade() {
            manager.remove(&self.id);
        }
    }

    /// Close shared resources. Leaves both participant sessions intact.
    pub async fn cleanup(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(token) = self.generation_token.lock().take() {
            token.cancel();
        }
        self.close_shared_tts().await;
        if let Some(manager) = self.manager.upgrade() {
            manager.remove(&self.id);
        }
    }

    async fn close_shared_tts(&self) {
        let mut tts_guard = self.shared_tts.lock().await;
        if let Some(mut tts) = tts_guard.take() {
            if let Err(e) = tts.disconnect().await {
                debug!("shared TTS close: {}", e);
            }
        }
    }
}

/// Fans shared TTS audio to both participants' egress transports.
struct ConferenceTtsCallback {
    coordinator_id: String,
    registry: Weak<SessionRegistry>,
    caller_sid: String,
    owner_sid: String,
}

impl AudioCallback for ConferenceTtsCallback {
    fn on_audio(&self, frame: Bytes) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        let registry = self.registry.upgrade();
        Box::pin(async move {
            let Some(registry) = registry else { return };
            if let Some(caller) = registry.get(&self.caller_sid) {
                caller.egress_raw(&frame);
            }
            if let Some(owner) = registry.get(&self.owner_sid) {
                owner.egress_raw(&frame);
            }
        })
    }

    fn on_flushed(&self) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        let id = self.coordinator_id.clone();
        Box::pin(async move {
            debug!("conference {}: shared reply drained", id);
        })
    }

    fn on_error(&self, error: TtsError) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        let id = self.coordinator_id.clone();
        Box::pin(async move {
            warn!("conference {}: shared TTS error: {}", id, error);
        })
    }
}
