//! Session audio paths: inbound frames, gated TTS egress, DTMF, verbatim
//! speech.
//!
//! The inbound path is the hot path: per-frame work is bounded, nothing
//! here waits on the session loop, and a swap in progress drops frames
//! rather than blocking them.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::call_state::CallState;
use crate::telephony::UplinkFrame;

use super::{Session, SessionError};

impl Session {
    /// Inbound μ-law frame from the telephony stream.
    ///
    /// Forwarded to STT; in a conference also routed to the peer. Never
    /// blocks: a locked adapter (swap window) drops the frame.
    pub async fn on_inbound_frame(&self, frame: Bytes) {
        if let Some(coordinator) = self.conference.read().clone() {
            coordinator.route_raw_audio(&self.stream_sid, &frame);
        }

        #[cfg(feature = "audio-barge-in")]
        if self.state.current() == CallState::Speaking && self.barge_in.should_interrupt(&frame) {
            let _ = self
                .event_tx
                .try_send(super::SessionEvent::ActivityInterrupt);
        }

        match self.stt.try_write() {
            Ok(mut stt) => {
                if let Err(e) = stt.send_audio(frame).await {
                    debug!("dropping inbound frame: {}", e);
                }
            }
            Err(_) => {
                // Adapter swap in flight; dropped, never misrouted
                debug!("inbound frame dropped during adapter swap");
            }
        }
    }

    /// Synthesized frame from TTS: gated egress to the telephony stream.
    pub fn on_tts_frame(&self, frame: &Bytes) {
        self.gate.send(frame);
    }

    /// Raw egress bypassing the gate. Conference peers always hear each
    /// other regardless of this session's gate.
    pub(crate) fn egress_raw(&self, frame: &Bytes) {
        let uplink = UplinkFrame::media(&self.stream_sid, frame);
        let _ = self.sink.read().send_frame(uplink);
    }

    /// Inject a final transcript. Used by the STT callback path and by
    /// tests; serialized through the event loop.
    pub async fn on_transcript(&self, text: &str, speaker_id: Option<u32>) {
        let utterance = crate::core::stt::Utterance {
            text: text.to_string(),
            speaker_id,
        };
        if self
            .event_tx
            .send(super::SessionEvent::Transcript(utterance))
            .await
            .is_err()
        {
            warn!("session loop gone, transcript dropped");
        }
    }

    /// The TTS adapter reported drained. Serialized through the loop.
    pub async fn on_tts_drained(&self) {
        let _ = self.event_tx.send(super::SessionEvent::TtsDrained).await;
    }

    /// Push text to TTS without the language service. Used for handoff
    /// announcements.
    pub async fn speak_verbatim(&self, text: &str) -> Result<(), SessionError> {
        match self.state.current() {
            CallState::Thinking => {
                return Err(SessionError::InvalidState(
                    "cannot speak verbatim while a generation is starting".to_string(),
                ));
            }
            CallState::Listening => {
                self.state.attempt(CallState::Thinking, "verbatim speech");
                self.state.attempt(CallState::Speaking, "verbatim speech");
            }
            CallState::Speaking => {}
            other => {
                return Err(SessionError::InvalidState(format!(
                    "cannot speak verbatim in state {other}"
                )));
            }
        }

        self.gate.enable();
        let mut tts = self.tts.write().await;
        tts.send_text(text).await?;
        tts.flush().await?;
        Ok(())
    }

    /// Emit DTMF digits on the telephony stream, one control frame per
    /// digit.
    pub fn send_dtmf(&self, digits: &str) -> Result<(), SessionError> {
        for digit in digits.chars() {
            if !digit.is_ascii_digit() && digit != '*' && digit != '#' {
                return Err(SessionError::InvalidDigit(digit));
            }
        }
        let sink = self.sink.read();
        for digit in digits.chars() {
            let _ = sink.send_frame(UplinkFrame::Dtmf {
                stream_sid: self.stream_sid.clone(),
                digit,
            });
        }
        Ok(())
    }
}
