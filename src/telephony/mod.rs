//! Telephony provider boundary: the bidirectional media-stream frame
//! protocol and the HTTP control plane for call updates and conferences.

pub mod client;
pub mod stream;

pub use client::{CallHandle, TelephonyClient};
pub use stream::{
    ChannelSink, DownlinkFrame, OutboundSink, StartParameters, TelephonyError, UplinkFrame,
};
