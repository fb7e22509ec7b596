//! Appointment store boundary.
//!
//! The runtime binds a session to an appointment when the telephony start
//! frame carries an `appointmentId`. Outcomes are persisted through this
//! contract; persistence failures are non-fatal and the outcome is retained
//! in memory for a retry on cleanup.

use serde::{Deserialize, Serialize};

/// Error types for the appointment store
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Appointment not found: {0}")]
    NotFound(String),
    #[error("Store not configured")]
    NotConfigured,
}

/// Call outcome recorded on an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "FAILED:TECH ERROR")]
    FailedTechError,
    #[serde(rename = "FAILED:BUSINESS CLOSED")]
    FailedBusinessClosed,
    #[serde(rename = "FAILED:HUMAN ERROR")]
    FailedHumanError,
    #[serde(rename = "FAILED:NO AVAILABLE SLOTS")]
    FailedNoAvailableSlots,
    #[serde(rename = "SUCCESS")]
    Success,
}

impl AppointmentStatus {
    /// Parse the wire form used by the tool schema.
    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

/// The requesting user's profile, returned alongside the appointment so the
/// agent can introduce itself on whose behalf it is calling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub appointment: Appointment,
    #[serde(default)]
    pub user: UserProfile,
}

/// Patch applied when recording an outcome.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentPatch {
    pub status: AppointmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Minimal persistence contract for appointment outcomes.
#[async_trait::async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<AppointmentRecord, AppointmentError>;
    async fn update(&self, id: &str, patch: AppointmentPatch) -> Result<(), AppointmentError>;
}

/// REST-backed appointment store.
pub struct RestAppointmentStore {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestAppointmentStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, id: &str) -> String {
        format!("{}/appointments/{id}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl AppointmentStore for RestAppointmentStore {
    async fn fetch(&self, id: &str) -> Result<AppointmentRecord, AppointmentError> {
        let response = self
            .client
            .get(self.endpoint(id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppointmentError::RequestFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppointmentError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(AppointmentError::RequestFailed(format!(
                "store returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppointmentError::RequestFailed(format!("bad record: {e}")))
    }

    async fn update(&self, id: &str, patch: AppointmentPatch) -> Result<(), AppointmentError> {
        let response = self
            .client
            .patch(self.endpoint(id))
            .bearer_auth(&self.api_key)
            .json(&patch)
            .send()
            .await
            .map_err(|e| AppointmentError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppointmentError::RequestFailed(format!(
                "store returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
