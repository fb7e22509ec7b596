//! Calendar service boundary: availability and event lookups used by the
//! agent's tool surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CalendarError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Calendar not configured")]
    NotConfigured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    pub start: String,
    pub end: String,
}

#[async_trait::async_trait]
pub trait CalendarService: Send + Sync {
    async fn availability(
        &self,
        start_date: &str,
        end_date: &str,
        min_duration_minutes: Option<u32>,
    ) -> Result<Vec<AvailabilitySlot>, CalendarError>;

    async fn events(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;
}

/// REST-backed calendar client.
pub struct RestCalendarService {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestCalendarService {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CalendarError> {
        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| CalendarError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CalendarError::RequestFailed(format!(
                "calendar returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| CalendarError::RequestFailed(format!("bad response: {e}")))
    }
}

#[async_trait::async_trait]
impl CalendarService for RestCalendarService {
    async fn availability(
        &self,
        start_date: &str,
        end_date: &str,
        min_duration_minutes: Option<u32>,
    ) -> Result<Vec<AvailabilitySlot>, CalendarError> {
        let mut query = vec![
            ("startDate", start_date.to_string()),
            ("endDate", end_date.to_string()),
        ];
        if let Some(minutes) = min_duration_minutes {
            query.push(("minDurationMinutes", minutes.to_string()));
        }
        self.get_json("/availability", &query).await
    }

    async fn events(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let query = vec![
            ("startDate", start_date.to_string()),
            ("endDate", end_date.to_string()),
        ];
        self.get_json("/events", &query).await
    }
}
