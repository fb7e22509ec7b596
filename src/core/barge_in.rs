//! Energy-based barge-in detection over raw μ-law frames.
//!
//! Defense-in-depth only: the authoritative barge-in path is a final
//! transcript arriving while the agent is speaking. This detector exists for
//! lines where the speech service is slow to endpoint.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// μ-law encodes silence around this byte value.
const MULAW_SILENCE: i16 = 127;
/// Deviation from silence beyond which a sample counts as active.
const ACTIVITY_DEVIATION: i16 = 3;
/// Fraction of active samples for a frame to count as voice activity.
const ACTIVITY_RATIO: f32 = 0.05;
/// Minimum gap between positive detections.
const DEBOUNCE_MS: u64 = 100;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-session activity detector with a 100 ms debounce.
///
/// State is two atomics; the per-frame check is allocation-free.
pub struct BargeInDetector {
    last_detection_ms: AtomicU64,
    total_detections: AtomicUsize,
}

impl BargeInDetector {
    pub fn new() -> Self {
        Self {
            last_detection_ms: AtomicU64::new(0),
            total_detections: AtomicUsize::new(0),
        }
    }

    /// Pure check: does this frame contain voice-level energy?
    pub fn frame_is_active(frame: &[u8]) -> bool {
        if frame.is_empty() {
            return false;
        }
        let active = frame
            .iter()
            .filter(|&&byte| (byte as i16 - MULAW_SILENCE).abs() > ACTIVITY_DEVIATION)
            .count();
        (active as f32 / frame.len() as f32) > ACTIVITY_RATIO
    }

    /// Debounced detection: true only when the frame is active and at least
    /// 100 ms have elapsed since the last positive detection.
    pub fn should_interrupt(&self, frame: &[u8]) -> bool {
        if !Self::frame_is_active(frame) {
            return false;
        }
        let now = now_ms();
        let last = self.last_detection_ms.load(Ordering::Acquire);
        if now.saturating_sub(last) < DEBOUNCE_MS {
            return false;
        }
        self.last_detection_ms.store(now, Ordering::Release);
        self.total_detections.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn detection_count(&self) -> usize {
        self.total_detections.load(Ordering::Relaxed)
    }
}

impl Default for BargeInDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_frame(len: usize) -> Vec<u8> {
        vec![MULAW_SILENCE as u8; len]
    }

    fn active_frame(len: usize) -> Vec<u8> {
        // Half of the samples well away from the silence value
        let mut frame = silent_frame(len);
        for byte in frame.iter_mut().take(len / 2) {
            *byte = 0x20;
        }
        frame
    }

    #[test]
    fn test_silent_frame_inactive() {
        assert!(!BargeInDetector::frame_is_active(&silent_frame(160)));
    }

    #[test]
    fn test_empty_frame_inactive() {
        assert!(!BargeInDetector::frame_is_active(&[]));
    }

    #[test]
    fn test_loud_frame_active() {
        assert!(BargeInDetector::frame_is_active(&active_frame(160)));
    }

    #[test]
    fn test_small_deviation_stays_inactive() {
        // Every sample within the +-3 deviation band
        let frame = vec![(MULAW_SILENCE + ACTIVITY_DEVIATION) as u8; 160];
        assert!(!BargeInDetector::frame_is_active(&frame));
    }

    #[test]
    fn test_ratio_boundary() {
        // Exactly 5% active samples: not strictly greater, so inactive
        let mut frame = silent_frame(100);
        for byte in frame.iter_mut().take(5) {
            *byte = 0x00;
        }
        assert!(!BargeInDetector::frame_is_active(&frame));

        // 6%: active
        for byte in frame.iter_mut().take(6) {
            *byte = 0x00;
        }
        assert!(BargeInDetector::frame_is_active(&frame));
    }

    #[test]
    fn test_debounce_within_window() {
        let detector = BargeInDetector::new();
        let frame = active_frame(160);
        assert!(detector.should_interrupt(&frame));
        // Immediately after a positive detection, the window suppresses
        assert!(!detector.should_interrupt(&frame));
        assert_eq!(detector.detection_count(), 1);
    }

    #[test]
    fn test_silent_frames_never_interrupt() {
        let detector = BargeInDetector::new();
        assert!(!detector.should_interrupt(&silent_frame(160)));
        assert_eq!(detector.detection_count(), 0);
    }
}
