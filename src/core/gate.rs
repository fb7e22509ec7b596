//! The audio gate: a one-bit valve on outbound synthesized audio.
//!
//! Decisions are strictly synchronous and local. The only I/O is the single
//! frame write through the injected sink; `clear_downstream` issues the
//! provider-side buffer clear.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::telephony::{OutboundSink, UplinkFrame};

/// Minimum gap between downstream clears.
const CLEAR_DEBOUNCE_MS: u64 = 50;
/// The clear command is repeated this many times for reliability.
const CLEAR_REPEAT: usize = 3;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct AudioGate {
    stream_sid: String,
    enabled: AtomicBool,
    last_clear_ms: AtomicU64,
    sink: RwLock<Arc<dyn OutboundSink>>,
}

impl AudioGate {
    pub fn new(stream_sid: impl Into<String>, sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            stream_sid: stream_sid.into(),
            enabled: AtomicBool::new(false),
            last_clear_ms: AtomicU64::new(0),
            sink: RwLock::new(sink),
        }
    }

    /// Swap the egress transport on media-stream reconnection.
    pub fn replace_sink(&self, sink: Arc<dyn OutboundSink>) {
        *self.sink.write() = sink;
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Write one synthesized frame to the telephony stream. Returns false
    /// when the frame was dropped (gate closed or egress unavailable).
    pub fn send(&self, frame: &Bytes) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let uplink = UplinkFrame::media(&self.stream_sid, frame);
        self.sink.read().send_frame(uplink).is_ok()
    }

    /// Ask the telephony stream to drop its buffered audio. Idempotent and
    /// debounced; the command is repeated for reliability.
    pub fn clear_downstream(&self) {
        let now = now_ms();
        let last = self.last_clear_ms.load(Ordering::Acquire);
        if now.saturating_sub(last) < CLEAR_DEBOUNCE_MS {
            return;
        }
        self.last_clear_ms.store(now, Ordering::Release);

        debug!("clearing downstream audio buffer for {}", self.stream_sid);
        let sink = self.sink.read();
        for _ in 0..CLEAR_REPEAT {
            let _ = sink.send_frame(UplinkFrame::Clear {
                stream_sid: self.stream_sid.clone(),
            });
        }
    }

    /// Close the valve and drop everything already buffered downstream.
    pub fn stop_immediately(&self) {
        self.disable();
        self.clear_downstream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<UplinkFrame>>,
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<UplinkFrame> {
            self.frames.lock().clone()
        }

        fn clear_count(&self) -> usize {
            self.frames
                .lock()
                .iter()
                .filter(|f| matches!(f, UplinkFrame::Clear { .. }))
                .count()
        }
    }

    impl OutboundSink for RecordingSink {
        fn send_frame(&self, frame: UplinkFrame) -> Result<(), crate::telephony::TelephonyError> {
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    fn gate_with_sink() -> (AudioGate, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let gate = AudioGate::new("MZ1", sink.clone() as Arc<dyn OutboundSink>);
        (gate, sink)
    }

    #[test]
    fn test_disabled_gate_drops_frames() {
        let (gate, sink) = gate_with_sink();
        assert!(!gate.send(&Bytes::from_static(&[1, 2, 3])));
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn test_enabled_gate_passes_frames() {
        let (gate, sink) = gate_with_sink();
        gate.enable();
        assert!(gate.send(&Bytes::from_static(&[1, 2, 3])));
        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], UplinkFrame::Media { stream_sid, .. } if stream_sid == "MZ1"));
    }

    #[test]
    fn test_clear_sends_three_commands() {
        let (gate, sink) = gate_with_sink();
        gate.clear_downstream();
        assert_eq!(sink.clear_count(), 3);
    }

    #[test]
    fn test_clear_debounced_within_window() {
        let (gate, sink) = gate_with_sink();
        gate.clear_downstream();
        gate.clear_downstream();
        // Second call inside the 50 ms window is a no-op
        assert_eq!(sink.clear_count(), 3);
    }

    #[test]
    fn test_stop_immediately_twice_same_as_once() {
        let (gate, sink) = gate_with_sink();
        gate.enable();
        gate.stop_immediately();
        gate.stop_immediately();
        assert!(!gate.is_enabled());
        assert_eq!(sink.clear_count(), 3);
        assert!(!gate.send(&Bytes::from_static(&[9])));
    }

    #[test]
    fn test_no_media_after_disable() {
        let (gate, sink) = gate_with_sink();
        gate.enable();
        gate.send(&Bytes::from_static(&[1]));
        gate.disable();
        gate.send(&Bytes::from_static(&[2]));
        let media: Vec<_> = sink
            .frames()
            .into_iter()
            .filter(|f| matches!(f, UplinkFrame::Media { .. }))
            .collect();
        assert_eq!(media.len(), 1);
    }
}
