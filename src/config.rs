use std::env;

/// Server configuration loaded from the environment.
///
/// Optional provider blocks (telephony control plane, appointment store,
/// calendar) disable their feature when absent; the speech and language
/// service credentials are required for startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Telephony control plane (optional; media streams work without it,
    // but outbound calls, hangup and conference transfer need it)
    pub telephony_account_sid: Option<String>,
    pub telephony_auth_token: Option<String>,
    pub telephony_phone_number: Option<String>,
    /// Public base URL used to compute stream/status callback URLs.
    pub public_base_url: Option<String>,

    // Speech service
    pub deepgram_api_key: String,

    // Language service
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,

    // Transfer-to-human target
    pub owner_phone_number: Option<String>,

    // Appointment store (optional)
    pub appointment_api_url: Option<String>,
    pub appointment_api_key: Option<String>,

    // Calendar service (optional)
    pub calendar_api_url: Option<String>,
    pub calendar_api_key: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads configuration from environment variables, with sensible
    /// defaults. Also loads from .env file if present using dotenvy.
    ///
    /// # Errors
    /// Returns an error if a required credential is missing or a numeric
    /// variable is malformed. `main` maps this to exit code 1.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        let telephony_account_sid = env::var("TELEPHONY_ACCOUNT_SID").ok();
        let telephony_auth_token = env::var("TELEPHONY_AUTH_TOKEN").ok();
        let telephony_phone_number = env::var("TELEPHONY_PHONE_NUMBER").ok();
        let public_base_url = env::var("PUBLIC_BASE_URL").ok();

        let deepgram_api_key = env::var("DEEPGRAM_API_KEY")
            .map_err(|_| "DEEPGRAM_API_KEY is required for the speech service")?;

        let llm_api_key = env::var("LLM_API_KEY")
            .map_err(|_| "LLM_API_KEY is required for the language service")?;
        let llm_base_url =
            env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let llm_model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let owner_phone_number = env::var("OWNER_PHONE_NUMBER").ok();

        let appointment_api_url = env::var("APPOINTMENT_API_URL").ok();
        let appointment_api_key = env::var("APPOINTMENT_API_KEY").ok();

        let calendar_api_url = env::var("CALENDAR_API_URL").ok();
        let calendar_api_key = env::var("CALENDAR_API_KEY").ok();

        let config = Self {
            host,
            port,
            telephony_account_sid,
            telephony_auth_token,
            telephony_phone_number,
            public_base_url,
            deepgram_api_key,
            llm_api_key,
            llm_base_url,
            llm_model,
            owner_phone_number,
            appointment_api_url,
            appointment_api_key,
            calendar_api_url,
            calendar_api_key,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation: partial telephony credentials are a
    /// configuration mistake, not a disabled feature.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let telephony_fields = [
            self.telephony_account_sid.is_some(),
            self.telephony_auth_token.is_some(),
            self.telephony_phone_number.is_some(),
        ];
        if telephony_fields.iter().any(|p| *p) && !telephony_fields.iter().all(|p| *p) {
            return Err(
                "TELEPHONY_ACCOUNT_SID, TELEPHONY_AUTH_TOKEN and TELEPHONY_PHONE_NUMBER must be set together"
                    .into(),
            );
        }
        if self.telephony_account_sid.is_some() && self.public_base_url.is_none() {
            return Err(
                "PUBLIC_BASE_URL is required when the telephony control plane is enabled".into(),
            );
        }
        Ok(())
    }

    /// Whether the telephony control plane is configured.
    pub fn telephony_enabled(&self) -> bool {
        self.telephony_account_sid.is_some()
    }

    /// Get the socket address string for binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ServerConfig {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 3001,
            telephony_account_sid: None,
            telephony_auth_token: None,
            telephony_phone_number: None,
            public_base_url: None,
            deepgram_api_key: "dg_key".to_string(),
            llm_api_key: "llm_key".to_string(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o".to_string(),
            owner_phone_number: None,
            appointment_api_url: None,
            appointment_api_key: None,
            calendar_api_url: None,
            calendar_api_key: None,
        }
    }

    #[test]
    fn test_minimal_config_validates() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn test_partial_telephony_credentials_rejected() {
        let mut config = minimal();
        config.telephony_account_sid = Some("AC123".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_telephony_requires_public_base_url() {
        let mut config = minimal();
        config.telephony_account_sid = Some("AC123".to_string());
        config.telephony_auth_token = Some("token".to_string());
        config.telephony_phone_number = Some("+15550001111".to_string());
        assert!(config.validate().is_err());

        config.public_base_url = Some("https://agent.example.com".to_string());
        assert!(config.validate().is_ok());
        assert!(config.telephony_enabled());
    }

    #[test]
    fn test_address_format() {
        let config = minimal();
        assert_eq!(config.address(), "0.0.0.0:3001");
    }
}
