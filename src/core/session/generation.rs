//! The session event loop, response generation and interruption handling.
//!
//! All call-state mutations flow through this single consumer. The inbound
//! audio path never enters it; transcripts, drain signals and barge-in
//! triggers do.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::call_state::CallState;
use crate::core::conversation::{ContentPart, Speaker, ToolResultEntry};
use crate::core::llm::{ChatRequest, LlmEvent};
use crate::core::session::SessionRole;
use crate::core::stt::Utterance;
use crate::core::tools::{SessionToolExecutor, tool_specs};

use super::{Session, SessionEvent};

/// How long to wait for the TTS drain signal before forcing Listening.
const FLUSH_WATCHDOG: Duration = Duration::from_secs(10);

/// How one generation drive ended.
enum DriveOutcome {
    Finished,
    Failed(String),
    Aborted,
    /// Barge-in; carries the transcript that caused it, if any.
    Interrupted(Option<Utterance>),
    AdapterClosed(String),
    ChannelClosed,
}

impl Session {
    pub(super) async fn run_event_loop(self: Arc<Self>, mut rx: mpsc::Receiver<SessionEvent>) {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if !self.handle_event(event, &mut rx).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = self.root_token.cancelled() => break,
            }
        }
        debug!("session {} event loop ended", self.stream_sid);
    }

    /// Returns false when the loop should stop.
    async fn handle_event(
        &self,
        event: SessionEvent,
        rx: &mut mpsc::Receiver<SessionEvent>,
    ) -> bool {
        match event {
            SessionEvent::Transcript(utterance) => {
                let coordinator = self.conference.read().clone();
                if let Some(coordinator) = coordinator {
                    let speaker = self.resolve_conference_speaker(&utterance);
                    coordinator.on_transcript(speaker, &utterance.text).await;
                    return true;
                }

                match self.state.current() {
                    CallState::Speaking => {
                        self.handle_interruption().await;
                        self.respond_chain(rx, utterance).await;
                    }
                    CallState::Listening => {
                        self.respond_chain(rx, utterance).await;
                    }
                    other => {
                        debug!("dropping transcript in state {}: '{}'", other, utterance.text);
                    }
                }
                true
            }
            SessionEvent::TtsDrained => {
                // Drain after a verbatim announcement or a forced timeout;
                // the in-generation drain is consumed inside await_drain
                if self.state.current() == CallState::Speaking {
                    self.gate.disable();
                    self.state.attempt(CallState::Listening, "drained");
                }
                true
            }
            SessionEvent::AdapterClosed(which) => {
                warn!("{} adapter closed, tearing down {}", which, self.stream_sid);
                self.initiate_teardown().await;
                false
            }
            SessionEvent::ActivityInterrupt => {
                if self.state.current() == CallState::Speaking {
                    info!("energy barge-in on {}", self.stream_sid);
                    self.handle_interruption().await;
                }
                true
            }
        }
    }

    /// Run generations until no barge-in transcript is pending.
    async fn respond_chain(&self, rx: &mut mpsc::Receiver<SessionEvent>, first: Utterance) {
        let mut next = Some(first);
        while let Some(utterance) = next.take() {
            next = self.respond(rx, utterance).await;
        }
    }

    /// One full generation: THINKING, stream, SPEAKING, drain. Returns a
    /// pending utterance when a barge-in arrived mid-generation.
    async fn respond(
        &self,
        rx: &mut mpsc::Receiver<SessionEvent>,
        utterance: Utterance,
    ) -> Option<Utterance> {
        {
            let mut conversation = self.conversation.write();
            let speaker = utterance
                .speaker_id
                .and_then(|id| conversation.resolve_speaker(id));
            conversation.append_user(&utterance.text, speaker);
        }

        if !self.state.attempt(CallState::Thinking, "user input") {
            return None;
        }

        let token = self.root_token.child_token();
        *self.generation_token.lock() = Some(token.clone());

        let mut system = self.ctx.system_prompt.clone();
        if let Some(briefing) = self.appointment_context.read().clone() {
            system.push_str("\n\n");
            system.push_str(&briefing);
        }
        let request = ChatRequest {
            system,
            messages: self.conversation.read().snapshot(),
            tools: tool_specs(),
        };
        let executor = Arc::new(SessionToolExecutor::new(
            self.registry.clone(),
            self.stream_sid.clone(),
            self.ctx.calendar.clone(),
        ));

        let mut llm_rx = match self
            .ctx
            .llm
            .stream_chat(request, executor, token.clone())
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                warn!("language service unavailable: {}", e);
                self.state.attempt(CallState::Listening, "llm error");
                *self.generation_token.lock() = None;
                return None;
            }
        };

        let mut spoke = false;
        let outcome = loop {
            tokio::select! {
                // Session events win: barge-in must preempt stream progress
                biased;

                event = rx.recv() => {
                    match event {
                        Some(SessionEvent::Transcript(next)) => {
                            if self.state.current() == CallState::Speaking {
                                self.handle_interruption().await;
                                break DriveOutcome::Interrupted(Some(next));
                            }
                            debug!("dropping transcript while thinking: '{}'", next.text);
                        }
                        Some(SessionEvent::ActivityInterrupt) => {
                            if self.state.current() == CallState::Speaking {
                                self.handle_interruption().await;
                                break DriveOutcome::Interrupted(None);
                            }
                        }
                        Some(SessionEvent::TtsDrained) => {
                            // Stale drain from a previous response
                        }
                        Some(SessionEvent::AdapterClosed(which)) => {
                            break DriveOutcome::AdapterClosed(which);
                        }
                        None => break DriveOutcome::ChannelClosed,
                    }
                }

                event = llm_rx.recv() => {
                    match event {
                        Some(LlmEvent::Start) => {}
                        Some(LlmEvent::TextStart { .. }) | Some(LlmEvent::TextEnd { .. }) => {}
                        Some(LlmEvent::TextDelta { text, .. }) => {
                            if !spoke {
                                spoke = true;
                                self.state.attempt(CallState::Speaking, "generating");
                                self.conversation.write().start_assistant();
                                self.gate.enable();
                            }
                            self.conversation.write().extend_assistant(&text);
                            let mut tts = self.tts.write().await;
                            if let Err(e) = tts.send_text(&text).await {
                                warn!("TTS rejected delta: {}", e);
                            }
                        }
                        Some(LlmEvent::Reasoning { text }) => {
                            debug!("model reasoning: {}", text);
                        }
                        Some(LlmEvent::ToolCall { id, name, args }) => {
                            self.conversation.write().add_assistant_structured(vec![
                                ContentPart::ToolCall { id, name, args },
                            ]);
                        }
                        Some(LlmEvent::ToolResult { id, payload }) => {
                            self.conversation.write().add_tool_results(vec![ToolResultEntry {
                                tool_call_id: id,
                                payload,
                            }]);
                        }
                        Some(LlmEvent::ToolError { id, message }) => {
                            warn!("tool call {} failed: {}", id, message);
                            self.conversation.write().add_tool_results(vec![ToolResultEntry {
                                tool_call_id: id,
                                payload: json!({"error": message}),
                            }]);
                        }
                        Some(LlmEvent::Finish { reason }) => {
                            debug!("generation finished: {}", reason);
                            break DriveOutcome::Finished;
                        }
                        Some(LlmEvent::Error { message }) => break DriveOutcome::Failed(message),
                        Some(LlmEvent::Abort) => break DriveOutcome::Aborted,
                        Some(LlmEvent::Unknown { kind }) => {
                            debug!("skipping unknown language service event '{}'", kind);
                        }
                        None => break DriveOutcome::Finished,
                    }
                }
            }
        };

        *self.generation_token.lock() = None;

        match outcome {
            DriveOutcome::Finished => {
                if spoke {
                    {
                        let mut tts = self.tts.write().await;
                        if let Err(e) = tts.flush().await {
                            warn!("TTS flush failed: {}", e);
                        }
                    }
                    self.conversation.write().finish_assistant();
                    self.await_drain(rx).await
                } else {
                    // Pure tool usage or an empty reply
                    self.state.attempt(CallState::Listening, "no speech");
                    None
                }
            }
            DriveOutcome::Failed(message) => {
                warn!("generation failed: {}", message);
                self.conversation.write().finish_assistant();
                self.gate.disable();
                self.state.attempt(CallState::Listening, "llm error");
                None
            }
            DriveOutcome::Aborted => {
                // Interruption or cleanup already handled the state
                None
            }
            DriveOutcome::Interrupted(next) => next,
            DriveOutcome::AdapterClosed(which) => {
                warn!("{} adapter closed mid-generation", which);
                self.initiate_teardown().await;
                None
            }
            DriveOutcome::ChannelClosed => None,
        }
    }

    /// Wait for the TTS drain signal, bounded by the watchdog.
    async fn await_drain(&self, rx: &mut mpsc::Receiver<SessionEvent>) -> Option<Utterance> {
        let deadline = tokio::time::sleep(FLUSH_WATCHDOG);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(SessionEvent::TtsDrained) => {
                            self.gate.disable();
                            self.state.attempt(CallState::Listening, "drained");
                            return None;
                        }
                        Some(SessionEvent::Transcript(next)) => {
                            // Barge-in inside the drain window
                            self.handle_interruption().await;
                            return Some(next);
                        }
                        Some(SessionEvent::ActivityInterrupt) => {
                            self.handle_interruption().await;
                            return None;
                        }
                        Some(SessionEvent::AdapterClosed(which)) => {
                            warn!("{} adapter closed during drain", which);
                            self.initiate_teardown().await;
                            return None;
                        }
                        None => return None,
                    }
                }
                _ = &mut deadline => {
                    warn!("no drain signal within {:?}, forcing LISTENING", FLUSH_WATCHDOG);
                    self.gate.disable();
                    self.state.attempt(CallState::Listening, "flush timeout");
                    return None;
                }
            }
        }
    }

    /// The interruption path. Must not await any network round-trip: gate
    /// and clear are channel writes, cancellation is a token flip, the TTS
    /// clear is a channel write.
    pub(crate) async fn handle_interruption(&self) {
        self.state.attempt(CallState::Interrupted, "user interrupted");
        self.gate.stop_immediately();
        if let Some(token) = self.generation_token.lock().take() {
            token.cancel();
        }
        {
            let mut tts = self.tts.write().await;
            if let Err(e) = tts.clear().await {
                debug!("TTS clear during interruption: {}", e);
            }
        }
        self.conversation.write().finish_assistant_interrupted();
        self.state.attempt(CallState::Listening, "ready");
    }

    fn resolve_conference_speaker(&self, utterance: &Utterance) -> Speaker {
        if let Some(id) = utterance.speaker_id {
            if let Some(speaker) = self.conversation.write().resolve_speaker(id) {
                return speaker;
            }
        }
        match self.role() {
            SessionRole::Owner => Speaker::Owner,
            _ => Speaker::Caller,
        }
    }

    pub(super) async fn initiate_teardown(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.delete(&self.stream_sid).await;
        } else {
            self.cleanup().await;
        }
    }
}
