//! The telephony media-stream WebSocket handler.
//!
//! One socket per call leg. A sender task owns the write half; the read
//! loop dispatches frames: `start` creates a session (or swaps adapters
//! when the stream sid is already known), `media` feeds the session's
//! inbound path, `stop` tears down unless a transfer reconnect is pending.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::session::{Session, SessionParams, SessionRole};
use crate::state::AppState;
use crate::telephony::{
    ChannelSink, DownlinkFrame, StartParameters, UplinkFrame, stream::decode_media_payload,
};

/// Larger than the default to absorb audio bursts without backpressure on
/// the session side.
const EGRESS_CHANNEL_SIZE: usize = 1024;

/// Telephony media-stream handler. Upgrades the HTTP connection to a
/// WebSocket speaking the provider's frame protocol.
pub async fn telephony_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("telephony stream connection upgrade requested");
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state))
}

async fn handle_stream_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (egress_tx, mut egress_rx) = mpsc::channel::<UplinkFrame>(EGRESS_CHANNEL_SIZE);

    // Sender task: serializes uplink frames onto the socket
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = egress_rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if let Err(e) = sender.send(Message::Text(json.into())).await {
                        error!("failed to send uplink frame: {}", e);
                        break;
                    }
                }
                Err(e) => error!("failed to serialize uplink frame: {}", e),
            }
        }
    });

    let mut session: Option<Arc<Session>> = None;
    let mut stopped_cleanly = false;

    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("telephony stream socket error: {}", e);
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let frame: DownlinkFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("unparseable downlink frame: {}", e);
                        continue;
                    }
                };
                match frame {
                    DownlinkFrame::Connected => {
                        debug!("telephony stream connected");
                    }
                    DownlinkFrame::Start {
                        stream_sid,
                        call_sid,
                        custom_parameters,
                    } => {
                        session = handle_start(
                            &app_state,
                            stream_sid,
                            call_sid,
                            custom_parameters,
                            egress_tx.clone(),
                        )
                        .await;
                    }
                    DownlinkFrame::Media { payload } => {
                        let Some(session) = session.as_ref() else {
                            continue;
                        };
                        match decode_media_payload(&payload) {
                            Ok(audio) => session.on_inbound_frame(audio).await,
                            Err(e) => debug!("bad media frame: {}", e),
                        }
                    }
                    DownlinkFrame::Stop { call_sid } => {
                        info!("stream stop for call {}", call_sid);
                        if let Some(session) = session.take() {
                            app_state.registry.release(session.stream_sid()).await;
                        }
                        stopped_cleanly = true;
                        break;
                    }
                }
            }
            Message::Close(_) => {
                debug!("telephony stream closed by provider");
                break;
            }
            _ => {}
        }
    }

    // Socket died without a stop frame: same teardown rules apply
    if !stopped_cleanly {
        if let Some(session) = session.take() {
            app_state.registry.release(session.stream_sid()).await;
        }
    }

    sender_task.abort();
    info!("telephony stream connection terminated");
}

/// Handle a `start` frame: new session, or adapter swap on a reappearing
/// stream sid, plus conference pairing for an owner leg.
async fn handle_start(
    app_state: &Arc<AppState>,
    stream_sid: String,
    call_sid: String,
    parameters: StartParameters,
    egress_tx: mpsc::Sender<UplinkFrame>,
) -> Option<Arc<Session>> {
    let role = match parameters.role.as_deref() {
        Some("owner") => SessionRole::Owner,
        Some("caller") => SessionRole::Caller,
        _ => SessionRole::Solo,
    };
    let diarize = parameters.conference_id.is_some();

    let stt = match app_state.speech.make_stt(diarize) {
        Ok(stt) => stt,
        Err(e) => {
            error!("cannot build STT for {}: {}", stream_sid, e);
            return None;
        }
    };
    let tts = match app_state.speech.make_tts() {
        Ok(tts) => tts,
        Err(e) => {
            error!("cannot build TTS for {}: {}", stream_sid, e);
            return None;
        }
    };
    let sink = Arc::new(ChannelSink::new(egress_tx));

    let registry = &app_state.registry;

    let session = if registry.has(&stream_sid) {
        // Reconnection: same stream sid means adapter swap, never a second
        // session
        info!("reconnect for known stream {}, swapping adapters", stream_sid);
        if let Err(e) = registry.replace_adapters(&stream_sid, stt, tts, sink).await {
            error!("adapter swap failed for {}: {}", stream_sid, e);
            return None;
        }
        registry.get(&stream_sid)?
    } else {
        let params = SessionParams {
            stream_sid: stream_sid.clone(),
            call_sid,
            caller: parameters.from.clone(),
            role,
            appointment_id: parameters.appointment_id.clone(),
        };
        match registry.create(params, stt, tts, sink).await {
            Ok(session) => session,
            Err(e) => {
                error!("session create failed for {}: {}", stream_sid, e);
                return None;
            }
        }
    };

    // An owner leg joining a conference completes the pairing
    if role == SessionRole::Owner {
        if let Some(conference_id) = parameters.conference_id.as_deref() {
            let paired = registry
                .conferences()
                .clone()
                .pair_owner(
                    conference_id,
                    &stream_sid,
                    registry,
                    app_state.gatekeeper.clone(),
                    app_state.speech.clone(),
                )
                .await;
            if paired.is_none() {
                warn!(
                    "owner leg for unknown conference {} on stream {}",
                    conference_id, stream_sid
                );
            }
        }
    }

    Some(session)
}
