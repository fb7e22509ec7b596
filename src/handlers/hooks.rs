//! Telephony control-plane callbacks: conference status events and the
//! TwiML served to the owner leg when it is dialed into a conference.

use std::sync::Arc;

use axum::{
    Form,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Form-encoded status callback from the telephony provider.
#[derive(Debug, Deserialize)]
pub struct ConferenceStatusEvent {
    #[serde(rename = "StatusCallbackEvent", alias = "event")]
    pub event: String,
    #[serde(rename = "ConferenceSid", alias = "conferenceSid", default)]
    pub conference_sid: Option<String>,
    #[serde(rename = "FriendlyName", alias = "friendlyName", default)]
    pub friendly_name: Option<String>,
    #[serde(rename = "ParticipantLabel", alias = "participantLabel", default)]
    pub participant_label: Option<String>,
}

/// Conference lifecycle callback. A conference ending tears the shared
/// resources down; participant sessions stay owned by the registry.
pub async fn conference_status_handler(
    State(state): State<Arc<AppState>>,
    Form(event): Form<ConferenceStatusEvent>,
) -> AppResult<Response> {
    info!(
        "conference event '{}' (sid={:?}, name={:?}, participant={:?})",
        event.event, event.conference_sid, event.friendly_name, event.participant_label
    );

    if event.event == "conference-end" {
        let name = event.friendly_name.as_deref().ok_or_else(|| {
            AppError::BadRequest("conference-end without FriendlyName".to_string())
        })?;
        if let Some(coordinator) = state.registry.conferences().get(name) {
            coordinator.cleanup().await;
        } else {
            warn!("conference-end for unknown conference {}", name);
        }
    }

    Ok(axum::http::StatusCode::OK.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ConferenceTwimlQuery {
    #[serde(rename = "conferenceId")]
    pub conference_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// TwiML served to a leg being dialed into a conference: re-declare the
/// media stream (carrying role and conference context), then join the
/// conference room.
///
/// Only conference ids issued by a live transfer are answered; anything
/// else is a stale dial or a probe and gets a 404 instead of TwiML that
/// would park the leg in an empty room.
pub async fn conference_twiml_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConferenceTwimlQuery>,
) -> AppResult<Response> {
    let base = state.config.public_base_url.clone().ok_or_else(|| {
        AppError::InternalServerError("public base URL not configured".to_string())
    })?;

    if !state.registry.conferences().is_known(&query.conference_id) {
        return Err(AppError::NotFound(format!(
            "conference {}",
            query.conference_id
        )));
    }

    let stream_url = base
        .trim_end_matches('/')
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1)
        + "/telephony/stream";
    let role = query.role.as_deref().unwrap_or("owner");

    let twiml = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<Response><Start><Stream url=\"{stream}\">",
            "<Parameter name=\"role\" value=\"{role}\"/>",
            "<Parameter name=\"conferenceId\" value=\"{conf}\"/>",
            "</Stream></Start>",
            "<Dial><Conference statusCallback=\"{base}/hooks/conference\" ",
            "statusCallbackEvent=\"start end join leave\">{conf}</Conference></Dial>",
            "</Response>"
        ),
        stream = stream_url,
        role = role,
        conf = query.conference_id,
        base = base.trim_end_matches('/'),
    );

    Ok(([(header::CONTENT_TYPE, "application/xml")], twiml).into_response())
}
