pub mod base;
pub mod deepgram;

pub use base::{AudioCallback, BaseTts, TtsConfig, TtsError, TtsResult};
pub use deepgram::DeepgramTts;
