pub mod base;
pub mod deepgram;
pub mod utterance;

pub use base::{
    BaseStt, SttConfig, SttError, SttErrorCallback, SttResult, SttResultCallback,
};
pub use deepgram::DeepgramStt;
pub use utterance::{Utterance, UtteranceAssembler};
