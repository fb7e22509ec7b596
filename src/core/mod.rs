pub mod barge_in;
pub mod calendar;
pub mod call_state;
pub mod conference;
pub mod conversation;
pub mod gate;
pub mod gatekeeper;
pub mod llm;
pub mod registry;
pub mod session;
pub mod stt;
pub mod tools;
pub mod tts;

use crate::core::stt::{BaseStt, SttError};
use crate::core::tts::{BaseTts, TtsError};

/// Builds speech adapters for new sessions and for the conference's shared
/// TTS channel. One factory per process, constructed at startup.
pub trait SpeechFactory: Send + Sync {
    fn make_stt(&self, diarize: bool) -> Result<Box<dyn BaseStt>, SttError>;
    fn make_tts(&self) -> Result<Box<dyn BaseTts>, TtsError>;
}
