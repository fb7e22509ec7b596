//! Shared application state: process-wide provider clients built once at
//! startup and injected into every session.

use std::sync::Arc;

use crate::appointments::RestAppointmentStore;
use crate::config::ServerConfig;
use crate::core::SpeechFactory;
use crate::core::calendar::RestCalendarService;
use crate::core::gatekeeper::{LlmGatekeeper, ResponseGatekeeper};
use crate::core::llm::OpenAiChat;
use crate::core::registry::SessionRegistry;
use crate::core::session::SessionContext;
use crate::core::stt::{BaseStt, DeepgramStt, SttConfig, SttError};
use crate::core::tts::{BaseTts, DeepgramTts, TtsConfig, TtsError};
use crate::telephony::TelephonyClient;

const SYSTEM_PROMPT: &str = "\
You are Jordan, a friendly voice assistant making phone calls on behalf of \
your owner to book and manage appointments. Keep replies short and natural; \
you are on a phone call. Use the tools you are given for calendar lookups, \
appointment updates, phone-menu navigation, handing the call to your owner, \
and ending the call with an outcome.";

/// Speech factory backed by Deepgram, carrying the telephony codec defaults.
pub struct DeepgramSpeechFactory {
    api_key: String,
}

impl DeepgramSpeechFactory {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl SpeechFactory for DeepgramSpeechFactory {
    fn make_stt(&self, diarize: bool) -> Result<Box<dyn BaseStt>, SttError> {
        let config = SttConfig {
            api_key: self.api_key.clone(),
            diarize,
            ..Default::default()
        };
        Ok(Box::new(DeepgramStt::new(config)?))
    }

    fn make_tts(&self) -> Result<Box<dyn BaseTts>, TtsError> {
        let config = TtsConfig {
            api_key: self.api_key.clone(),
            ..Default::default()
        };
        Ok(Box::new(DeepgramTts::new(config)?))
    }
}

/// Application state shared across handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<SessionRegistry>,
    pub speech: Arc<dyn SpeechFactory>,
    pub gatekeeper: Arc<dyn ResponseGatekeeper>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let llm = Arc::new(OpenAiChat::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
        ));

        let telephony = config.telephony_account_sid.as_ref().map(|sid| {
            Arc::new(TelephonyClient::new(
                sid.clone(),
                config.telephony_auth_token.clone().unwrap_or_default(),
                config.telephony_phone_number.clone().unwrap_or_default(),
            ))
        });

        let calendar = config.calendar_api_url.as_ref().map(|url| {
            Arc::new(RestCalendarService::new(
                url.clone(),
                config.calendar_api_key.clone().unwrap_or_default(),
            )) as Arc<dyn crate::core::calendar::CalendarService>
        });

        let appointments = config.appointment_api_url.as_ref().map(|url| {
            Arc::new(RestAppointmentStore::new(
                url.clone(),
                config.appointment_api_key.clone().unwrap_or_default(),
            )) as Arc<dyn crate::appointments::AppointmentStore>
        });

        let ctx = SessionContext {
            llm: llm.clone(),
            telephony,
            calendar,
            appointments,
            owner_phone_number: config.owner_phone_number.clone(),
            public_base_url: config.public_base_url.clone(),
            system_prompt: SYSTEM_PROMPT.to_string(),
        };

        Arc::new(Self {
            registry: SessionRegistry::new(ctx),
            speech: Arc::new(DeepgramSpeechFactory::new(config.deepgram_api_key.clone())),
            gatekeeper: Arc::new(LlmGatekeeper::new(llm)),
            config,
        })
    }
}
