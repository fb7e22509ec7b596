//! Handoff to a human: announcement, conference creation, hangup, and
//! appointment outcome recording.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{info, warn};

use crate::appointments::{AppointmentPatch, AppointmentStatus};
use crate::core::call_state::CallState;
use crate::telephony::TelephonyError;

use super::{Session, SessionError};

/// Pause between the announcement and the conference rebuild, so the tail
/// of the spoken audio reaches the caller before the stream is replaced.
const TRANSFER_SETTLE: Duration = Duration::from_millis(3500);

const TRANSFER_ANNOUNCEMENT: &str =
    "One moment please, I'm bringing my owner into the call.";

impl Session {
    /// Bring the human owner into the call as a 3-way conference.
    ///
    /// Speaks an announcement, waits a settle interval, then asks the
    /// telephony control plane to move this call into a conference and dial
    /// the owner. On any failure the session reverts to Listening and the
    /// error propagates to the caller (the tool surfaces it to the model,
    /// which keeps the conversation going).
    pub async fn transfer_to_human(&self, reason: &str) -> Result<(), SessionError> {
        let telephony = self
            .ctx
            .telephony
            .clone()
            .ok_or(TelephonyError::NotConfigured)?;
        let owner_phone = self.ctx.owner_phone_number.clone().ok_or_else(|| {
            SessionError::TransferFailed("no owner phone number configured".to_string())
        })?;
        let base_url = self.ctx.public_base_url.clone().ok_or_else(|| {
            SessionError::TransferFailed("no public base URL configured".to_string())
        })?;

        info!("transferring {} to human: {}", self.call_sid, reason);
        self.transferring.store(true, Ordering::Release);

        // Force SPEAKING for the announcement; a transfer invoked from a
        // tool call arrives in THINKING, one invoked mid-reply in SPEAKING.
        match self.state.current() {
            CallState::Thinking => {
                self.state.attempt(CallState::Speaking, "transfer announcement");
            }
            CallState::Listening => {
                self.state.attempt(CallState::Thinking, "transfer announcement");
                self.state.attempt(CallState::Speaking, "transfer announcement");
            }
            _ => {}
        }
        self.gate.enable();
        {
            let mut tts = self.tts.write().await;
            if let Err(e) = tts.send_text(TRANSFER_ANNOUNCEMENT).await {
                warn!("transfer announcement failed: {}", e);
            } else if let Err(e) = tts.flush().await {
                warn!("transfer announcement flush failed: {}", e);
            }
        }

        tokio::time::sleep(TRANSFER_SETTLE).await;

        // Unique per transfer: the same call can be transferred again after
        // a failed attempt
        let conference_id = format!("conf-{}", uuid::Uuid::new_v4().simple());
        let result = self
            .rebuild_as_conference(&telephony, &conference_id, &owner_phone, &base_url)
            .await;

        match result {
            Ok(()) => {
                if let Some(registry) = self.registry.upgrade() {
                    registry
                        .conferences()
                        .register_pending(&conference_id, &self.stream_sid);
                }
                Ok(())
            }
            Err(e) => {
                warn!("conference setup failed: {}", e);
                self.transferring.store(false, Ordering::Release);
                self.gate.disable();
                self.state.attempt(CallState::Listening, "transfer failed");
                Err(SessionError::TransferFailed(e.to_string()))
            }
        }
    }

    async fn rebuild_as_conference(
        &self,
        telephony: &crate::telephony::TelephonyClient,
        conference_id: &str,
        owner_phone: &str,
        base_url: &str,
    ) -> Result<(), TelephonyError> {
        let base = base_url.trim_end_matches('/');
        let stream_url = format!(
            "{}/telephony/stream",
            base.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1)
        );

        // The caller's leg re-declares its media stream (same stream sid
        // context travels via parameters) and joins the conference; the
        // reappearing start frame triggers the adapter swap.
        let caller_twiml = format!(
            concat!(
                "<Response><Start><Stream url=\"{stream}\">",
                "<Parameter name=\"role\" value=\"caller\"/>",
                "<Parameter name=\"conferenceId\" value=\"{conf}\"/>",
                "</Stream></Start>",
                "<Dial><Conference>{conf}</Conference></Dial></Response>"
            ),
            stream = stream_url,
            conf = conference_id,
        );
        telephony.update_call(&self.call_sid, &caller_twiml).await?;

        // The owner leg answers with TwiML that joins the conference and
        // declares its own media stream; status callbacks ride on that dial
        let owner_twiml_url = format!(
            "{base}/telephony/twiml/conference?conferenceId={conference_id}&role=owner"
        );
        telephony
            .create_conference(conference_id, owner_phone, &owner_twiml_url)
            .await?;
        Ok(())
    }

    /// Initiate telephony termination. Idempotent: applied twice, at most
    /// one terminate request reaches the control plane. The session itself
    /// is deleted by the registry when the stream closes.
    pub async fn hang_up(&self) -> Result<(), SessionError> {
        if self.hangup_requested.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("hanging up call {}", self.call_sid);
        if let Some(telephony) = &self.ctx.telephony {
            telephony.hang_up(&self.call_sid).await?;
        }
        Ok(())
    }

    /// Record the appointment outcome. Kept in memory and retried on
    /// cleanup when the store write fails; persistence failure is never
    /// surfaced to the call.
    pub async fn record_outcome(&self, status: AppointmentStatus, notes: Option<String>) {
        let patch = AppointmentPatch { status, notes };
        *self.pending_outcome.lock() = Some(patch.clone());

        let (Some(store), Some(appointment_id)) =
            (self.ctx.appointments.as_ref(), self.appointment_id.as_deref())
        else {
            return;
        };
        match store.update(appointment_id, patch).await {
            Ok(()) => {
                *self.pending_outcome.lock() = None;
            }
            Err(e) => {
                warn!("appointment update failed, retaining for retry: {}", e);
            }
        }
    }
}
