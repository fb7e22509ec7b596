//! Utterance assembly over raw STT results.
//!
//! The speech service delivers an utterance as a run of final fragments
//! terminated by `speech_final`. The assembler buffers the fragments and
//! emits a single joined utterance with the leading speaker id, so the
//! session sees at most one delivered final utterance at a time.

use parking_lot::Mutex;
use tracing::debug;

use super::base::SttResult;

/// One complete user utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// Raw diarization id of the first fragment, when diarization is on.
    pub speaker_id: Option<u32>,
}

#[derive(Default)]
struct Buffer {
    fragments: Vec<String>,
    speaker_id: Option<u32>,
}

/// Accumulates final STT fragments until the speech service endpoints.
pub struct UtteranceAssembler {
    buffer: Mutex<Buffer>,
}

impl UtteranceAssembler {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Buffer::default()),
        }
    }

    /// Feed one raw result. Returns a complete utterance when this result
    /// ends the speech segment, `None` otherwise.
    pub fn push(&self, result: &SttResult) -> Option<Utterance> {
        // Interim results never contribute text
        if !result.is_final && !result.is_speech_final {
            return None;
        }

        let mut buffer = self.buffer.lock();

        let trimmed = result.transcript.trim();
        if result.is_final && !trimmed.is_empty() {
            if buffer.fragments.is_empty() {
                buffer.speaker_id = result.speaker_id;
            }
            buffer.fragments.push(trimmed.to_string());
        }

        if !result.is_speech_final {
            return None;
        }

        let joined = buffer.fragments.join(" ");
        let speaker_id = buffer.speaker_id;
        *buffer = Buffer::default();
        drop(buffer);

        if joined.is_empty() {
            debug!("speech_final with empty utterance, skipping");
            return None;
        }
        Some(Utterance {
            text: joined,
            speaker_id,
        })
    }

    /// Drop anything buffered (adapter swap, cleanup).
    pub fn reset(&self) {
        *self.buffer.lock() = Buffer::default();
    }
}

impl Default for UtteranceAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_fragment(text: &str, speaker: Option<u32>) -> SttResult {
        SttResult::new(text.to_string(), true, false, speaker, 0.9)
    }

    fn speech_final(text: &str, speaker: Option<u32>) -> SttResult {
        SttResult::new(text.to_string(), true, true, speaker, 0.9)
    }

    #[test]
    fn test_single_fragment_utterance() {
        let assembler = UtteranceAssembler::new();
        let utterance = assembler.push(&speech_final("Hi there", None)).unwrap();
        assert_eq!(utterance.text, "Hi there");
        assert_eq!(utterance.speaker_id, None);
    }

    #[test]
    fn test_fragments_joined_on_speech_final() {
        let assembler = UtteranceAssembler::new();
        assert!(assembler.push(&final_fragment("I would like", None)).is_none());
        assert!(assembler.push(&final_fragment("to book a table", None)).is_none());
        let utterance = assembler.push(&speech_final("for two", None)).unwrap();
        assert_eq!(utterance.text, "I would like to book a table for two");
    }

    #[test]
    fn test_interim_results_ignored() {
        let assembler = UtteranceAssembler::new();
        let interim = SttResult::new("I wou".to_string(), false, false, None, 0.5);
        assert!(assembler.push(&interim).is_none());
        let utterance = assembler.push(&speech_final("I would", None)).unwrap();
        assert_eq!(utterance.text, "I would");
    }

    #[test]
    fn test_leading_speaker_id_wins() {
        let assembler = UtteranceAssembler::new();
        assembler.push(&final_fragment("Jordan,", Some(2)));
        let utterance = assembler.push(&speech_final("check my calendar", Some(5))).unwrap();
        assert_eq!(utterance.speaker_id, Some(2));
    }

    #[test]
    fn test_empty_speech_final_skipped() {
        let assembler = UtteranceAssembler::new();
        assert!(assembler.push(&speech_final("", None)).is_none());
        assert!(assembler.push(&speech_final("   ", None)).is_none());
    }

    #[test]
    fn test_buffer_resets_between_utterances() {
        let assembler = UtteranceAssembler::new();
        assembler.push(&final_fragment("first", Some(1)));
        assembler.push(&speech_final("utterance", Some(1)));

        let utterance = assembler.push(&speech_final("second", Some(2))).unwrap();
        assert_eq!(utterance.text, "second");
        assert_eq!(utterance.speaker_id, Some(2));
    }

    #[test]
    fn test_reset_drops_buffered_fragments() {
        let assembler = UtteranceAssembler::new();
        assembler.push(&final_fragment("stale", None));
        assembler.reset();
        let utterance = assembler.push(&speech_final("fresh", None)).unwrap();
        assert_eq!(utterance.text, "fresh");
    }
}
