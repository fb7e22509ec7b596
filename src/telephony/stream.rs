//! Media-stream frame protocol.
//!
//! The telephony provider speaks a framed, bidirectional protocol over a
//! WebSocket: downlink frames carry call lifecycle and base64 μ-law audio,
//! uplink frames carry synthesized audio and stream control commands.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Error types for the telephony stream boundary
#[derive(Debug, Clone, thiserror::Error)]
pub enum TelephonyError {
    #[error("Stream closed: {0}")]
    StreamClosed(String),
    #[error("Egress queue full")]
    QueueFull,
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("Control plane error: {0}")]
    ControlPlane(String),
    #[error("Control plane not configured")]
    NotConfigured,
}

/// Custom parameters attached to a `start` frame by the dialer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StartParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "appointmentId", skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(rename = "conferenceId", skip_serializing_if = "Option::is_none")]
    pub conference_id: Option<String>,
    /// `caller` or `owner`; absent on a plain solo call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Frames received from the telephony provider.
///
/// A `start` frame may reappear with an already-known stream sid: that is a
/// media-stream reconnection and must trigger an adapter swap, not a new
/// session.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "event")]
pub enum DownlinkFrame {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "start")]
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        #[serde(rename = "callSid")]
        call_sid: String,
        #[serde(rename = "customParameters", default)]
        custom_parameters: StartParameters,
    },
    #[serde(rename = "media")]
    Media {
        /// Base64-encoded μ-law 8 kHz mono audio.
        payload: String,
    },
    #[serde(rename = "stop")]
    Stop {
        #[serde(rename = "callSid")]
        call_sid: String,
    },
}

/// Frames sent back to the telephony provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum UplinkFrame {
    #[serde(rename = "media")]
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Base64-encoded μ-law 8 kHz mono audio.
        payload: String,
    },
    #[serde(rename = "mark")]
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        name: String,
    },
    /// Drops audio buffered downstream of us. Sent three times on
    /// interruption for reliability.
    #[serde(rename = "clear")]
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    #[serde(rename = "dtmf")]
    Dtmf {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        digit: char,
    },
}

impl UplinkFrame {
    /// Build a media frame from raw μ-law bytes.
    pub fn media(stream_sid: &str, payload: &Bytes) -> Self {
        use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
        UplinkFrame::Media {
            stream_sid: stream_sid.to_string(),
            payload: BASE64.encode(payload),
        }
    }
}

/// Writer half of the media stream, injected into sessions.
///
/// Sends must never block the caller: the production implementation wraps
/// the socket sender task's channel and drops frames when it is saturated.
pub trait OutboundSink: Send + Sync {
    fn send_frame(&self, frame: UplinkFrame) -> Result<(), TelephonyError>;
}

/// `OutboundSink` backed by the WebSocket sender task's channel.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<UplinkFrame>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::Sender<UplinkFrame>) -> Self {
        Self { tx }
    }
}

impl OutboundSink for ChannelSink {
    fn send_frame(&self, frame: UplinkFrame) -> Result<(), TelephonyError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("egress channel full, dropping uplink frame");
                Err(TelephonyError::QueueFull)
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                Err(TelephonyError::StreamClosed("egress channel closed".to_string()))
            }
        }
    }
}

/// Decode a downlink media payload into raw μ-law bytes.
pub fn decode_media_payload(payload: &str) -> Result<Bytes, TelephonyError> {
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    BASE64
        .decode(payload)
        .map(Bytes::from)
        .map_err(|e| TelephonyError::InvalidFrame(format!("bad media payload: {e}")))
}
