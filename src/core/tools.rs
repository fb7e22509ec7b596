//! The tool surface exposed to the language service.
//!
//! Tool names and input schemas are the stable contract. The executor never
//! holds a session reference: it carries the stream id and resolves the
//! owning session through the registry on each call, so tool handles cannot
//! keep a torn-down session alive.

use std::sync::{Arc, Weak};

use serde_json::{Value, json};
use tracing::warn;

use crate::appointments::AppointmentStatus;
use crate::core::calendar::CalendarService;
use crate::core::llm::{ToolDispatch, ToolSpec};
use crate::core::registry::SessionRegistry;

/// Schemas for every tool the agent owns.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "get_calendar_availability".to_string(),
            description: "Look up free slots in the user's calendar between two dates".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "startDate": {"type": "string", "description": "ISO date, inclusive"},
                    "endDate": {"type": "string", "description": "ISO date, exclusive"},
                    "minDurationMinutes": {"type": "integer", "minimum": 1}
                },
                "required": ["startDate", "endDate"]
            }),
        },
        ToolSpec {
            name: "get_calendar_events".to_string(),
            description: "List the user's calendar events between two dates".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "startDate": {"type": "string"},
                    "endDate": {"type": "string"}
                },
                "required": ["startDate", "endDate"]
            }),
        },
        ToolSpec {
            name: "transfer_to_human".to_string(),
            description: "Bring the human owner into the call as a three-way conference"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string", "description": "Why the handoff is needed"}
                },
                "required": ["reason"]
            }),
        },
        ToolSpec {
            name: "send_dtmf".to_string(),
            description: "Send DTMF digits on the call, e.g. to navigate a phone menu".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "digits": {"type": "string", "pattern": "^[0-9*#]+$"}
                },
                "required": ["digits"]
            }),
        },
        ToolSpec {
            name: "hang_up_call".to_string(),
            description: "Record the call outcome and terminate the call".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": [
                            "PENDING",
                            "IN_PROGRESS",
                            "FAILED:TECH ERROR",
                            "FAILED:BUSINESS CLOSED",
                            "FAILED:HUMAN ERROR",
                            "FAILED:NO AVAILABLE SLOTS",
                            "SUCCESS"
                        ]
                    },
                    "notes": {"type": "string"}
                },
                "required": ["status"]
            }),
        },
        ToolSpec {
            name: "update_appointment_status".to_string(),
            description: "Persist the appointment outcome without ending the call".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": [
                            "PENDING",
                            "IN_PROGRESS",
                            "FAILED:TECH ERROR",
                            "FAILED:BUSINESS CLOSED",
                            "FAILED:HUMAN ERROR",
                            "FAILED:NO AVAILABLE SLOTS",
                            "SUCCESS"
                        ]
                    },
                    "notes": {"type": "string"}
                },
                "required": ["status"]
            }),
        },
    ]
}

/// Per-generation tool executor bound to one session by stream id.
pub struct SessionToolExecutor {
    registry: Weak<SessionRegistry>,
    stream_sid: String,
    calendar: Option<Arc<dyn CalendarService>>,
}

impl SessionToolExecutor {
    pub fn new(
        registry: Weak<SessionRegistry>,
        stream_sid: impl Into<String>,
        calendar: Option<Arc<dyn CalendarService>>,
    ) -> Self {
        Self {
            registry,
            stream_sid: stream_sid.into(),
            calendar,
        }
    }

    fn session(&self) -> Result<Arc<crate::core::session::Session>, String> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| "registry gone".to_string())?;
        registry
            .get(&self.stream_sid)
            .ok_or_else(|| format!("session {} gone", self.stream_sid))
    }

    fn parse_status(args: &Value) -> Result<AppointmentStatus, String> {
        let raw = args["status"]
            .as_str()
            .ok_or_else(|| "status is required".to_string())?;
        AppointmentStatus::parse(raw).ok_or_else(|| format!("unknown status '{raw}'"))
    }
}

#[async_trait::async_trait]
impl ToolDispatch for SessionToolExecutor {
    async fn dispatch(&self, name: &str, args: Value) -> Result<Value, String> {
        match name {
            "get_calendar_availability" => {
                let calendar = self
                    .calendar
                    .as_ref()
                    .ok_or_else(|| "calendar not configured".to_string())?;
                let start = args["startDate"].as_str().ok_or("startDate is required")?;
                let end = args["endDate"].as_str().ok_or("endDate is required")?;
                let min_duration = args["minDurationMinutes"].as_u64().map(|m| m as u32);
                let slots = calendar
                    .availability(start, end, min_duration)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({"slots": slots}))
            }
            "get_calendar_events" => {
                let calendar = self
                    .calendar
                    .as_ref()
                    .ok_or_else(|| "calendar not configured".to_string())?;
                let start = args["startDate"].as_str().ok_or("startDate is required")?;
                let end = args["endDate"].as_str().ok_or("endDate is required")?;
                let events = calendar.events(start, end).await.map_err(|e| e.to_string())?;
                Ok(json!({"events": events}))
            }
            "transfer_to_human" => {
                let reason = args["reason"].as_str().unwrap_or("unspecified").to_string();
                let session = self.session()?;
                session
                    .transfer_to_human(&reason)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({"transferred": true}))
            }
            "send_dtmf" => {
                let digits = args["digits"].as_str().ok_or("digits is required")?;
                let session = self.session()?;
                session.send_dtmf(digits).map_err(|e| e.to_string())?;
                Ok(json!({"sent": digits}))
            }
            "hang_up_call" => {
                let status = Self::parse_status(&args)?;
                let notes = args["notes"].as_str().map(|s| s.to_string());
                let session = self.session()?;
                session.record_outcome(status, notes).await;
                session.hang_up().await.map_err(|e| e.to_string())?;
                Ok(json!({"ended": true}))
            }
            "update_appointment_status" => {
                let status = Self::parse_status(&args)?;
                let notes = args["notes"].as_str().map(|s| s.to_string());
                let session = self.session()?;
                session.record_outcome(status, notes).await;
                Ok(json!({"updated": true}))
            }
            other => {
                warn!("language service requested unknown tool '{}'", other);
                Err(format!("unknown tool '{other}'"))
            }
        }
    }
}
