//! Session lifecycle: start, adapter swap, cleanup.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use crate::core::call_state::CallState;
use crate::core::stt::BaseStt;
use crate::core::tts::BaseTts;
use crate::telephony::OutboundSink;

use super::events::{SessionTtsCallback, stt_result_handler, stt_error_handler};
use super::{Session, SessionError};

impl Session {
    /// Connect adapters, wire callbacks, spawn the event loop, and move to
    /// Listening.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        self.wire_adapters().await?;

        {
            let mut stt = self.stt.write().await;
            stt.connect().await?;
        }
        {
            let mut tts = self.tts.write().await;
            tts.connect().await?;
        }

        let rx = self.event_rx.lock().take();
        let Some(rx) = rx else {
            warn!("session {} already started", self.stream_sid);
            return Ok(());
        };
        let session = self.clone();
        tokio::spawn(async move {
            session.run_event_loop(rx).await;
        });

        self.load_appointment_context().await;
        self.init();
        Ok(())
    }

    /// Brief the agent on the bound appointment. Store failures are
    /// non-fatal; the call proceeds unbriefed.
    async fn load_appointment_context(&self) {
        let (Some(store), Some(appointment_id)) =
            (self.ctx.appointments.as_ref(), self.appointment_id.as_deref())
        else {
            return;
        };
        match store.fetch(appointment_id).await {
            Ok(record) => {
                let on_behalf = record
                    .user
                    .name
                    .as_deref()
                    .unwrap_or("your owner")
                    .to_string();
                let mut briefing = format!(
                    "You are calling on behalf of {on_behalf} about appointment {appointment_id}."
                );
                if let Some(notes) = record.appointment.notes.as_deref() {
                    briefing.push_str(&format!(" Notes: {notes}"));
                }
                *self.appointment_context.write() = Some(briefing);
            }
            Err(e) => {
                warn!("could not load appointment {}: {}", appointment_id, e);
            }
        }
    }

    /// IDLE -> LISTENING. Never fails; a repeated call is a logged no-op.
    pub fn init(&self) {
        self.state.attempt(CallState::Listening, "session initialized");
    }

    async fn wire_adapters(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut stt = self.stt.write().await;
            stt.on_result(stt_result_handler(
                self.assembler.clone(),
                self.event_tx.clone(),
            ))
            .await?;
            stt.on_error(stt_error_handler(self.event_tx.clone())).await?;
        }
        {
            let mut tts = self.tts.write().await;
            tts.on_audio(Arc::new(SessionTtsCallback {
                session: Arc::downgrade(self),
                event_tx: self.event_tx.clone(),
            }))?;
        }
        Ok(())
    }

    /// In-place adapter swap on media-stream reconnection.
    ///
    /// Conversation, state, conference binding and speaker bindings are
    /// untouched. Inbound frames racing the swap are dropped by
    /// `on_inbound_frame`'s try-lock, never misrouted. The old handles are
    /// closed exactly once.
    pub(crate) async fn replace_adapters(
        self: &Arc<Self>,
        new_stt: Box<dyn BaseStt>,
        new_tts: Box<dyn BaseTts>,
        new_sink: Arc<dyn OutboundSink>,
    ) -> Result<(), SessionError> {
        info!("swapping adapters for stream {}", self.stream_sid);

        self.assembler.reset();
        self.gate.replace_sink(new_sink.clone());
        *self.sink.write() = new_sink;

        {
            let mut stt = self.stt.write().await;
            let mut old_stt = std::mem::replace(&mut *stt, new_stt);
            if let Err(e) = old_stt.disconnect().await {
                debug!("old STT close after swap: {}", e);
            }
        }
        {
            let mut tts = self.tts.write().await;
            let mut old_tts = std::mem::replace(&mut *tts, new_tts);
            if let Err(e) = old_tts.disconnect().await {
                debug!("old TTS close after swap: {}", e);
            }
        }

        self.wire_adapters().await?;
        {
            let mut stt = self.stt.write().await;
            stt.connect().await?;
        }
        {
            let mut tts = self.tts.write().await;
            tts.connect().await?;
        }

        self.transferring.store(false, Ordering::Release);
        info!("adapter swap complete for stream {}", self.stream_sid);
        Ok(())
    }

    /// Tear the session down. Idempotent; later calls are no-ops.
    pub async fn cleanup(&self) {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("cleaning up session {}", self.stream_sid);

        // Abort any in-flight generation, then the root scope
        if let Some(token) = self.generation_token.lock().take() {
            token.cancel();
        }
        self.root_token.cancel();

        self.gate.disable();
        self.assembler.reset();

        let coordinator = self.conference.read().clone();
        if let Some(coordinator) = coordinator {
            coordinator.participant_left(&self.stream_sid).await;
        }

        {
            let mut stt = self.stt.write().await;
            if let Err(e) = stt.disconnect().await {
                debug!("STT close during cleanup: {}", e);
            }
        }
        {
            let mut tts = self.tts.write().await;
            if let Err(e) = tts.disconnect().await {
                debug!("TTS close during cleanup: {}", e);
            }
        }

        self.retry_pending_outcome().await;
        self.state.attempt(CallState::Idle, "teardown");
    }

    /// One retry of an outcome write that failed mid-call.
    async fn retry_pending_outcome(&self) {
        let pending = self.pending_outcome.lock().take();
        let (Some(patch), Some(store), Some(appointment_id)) =
            (pending, self.ctx.appointments.as_ref(), self.appointment_id.as_deref())
        else {
            return;
        };
        if let Err(e) = store.update(appointment_id, patch).await {
            warn!("appointment outcome lost after retry: {}", e);
        }
    }
}
