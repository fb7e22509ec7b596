//! The conference response gatekeeper.
//!
//! A pure advisor: given the recent conversation and the last speaker, it
//! decides whether the agent should respond. The advisor itself may call a
//! language service, so it is bounded by a timeout and any failure defaults
//! to staying silent.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::conversation::{Message, MessageContent, Speaker};
use crate::core::llm::LanguageModel;

/// How many trailing messages the advisor sees.
const ADVISOR_WINDOW: usize = 8;
/// Advisor deadline; past this the agent stays silent.
const ADVISOR_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GateAdvice {
    pub respond: bool,
    pub reason: String,
    pub confidence: f32,
}

impl GateAdvice {
    /// The failure default: silent with zero confidence.
    pub fn silent(reason: impl Into<String>) -> Self {
        Self {
            respond: false,
            reason: reason.into(),
            confidence: 0.0,
        }
    }
}

#[async_trait::async_trait]
pub trait ResponseGatekeeper: Send + Sync {
    async fn advise(&self, recent: &[Message], last_speaker: Speaker) -> GateAdvice;
}

const ADVISOR_SYSTEM: &str = "\
You decide whether an AI voice assistant should speak next in a three-way \
phone call between a caller, the assistant's owner, and the assistant. \
Respond with JSON only: {\"respond\": bool, \"reason\": string, \"confidence\": number 0..1}. \
The assistant should respond when it is addressed by name, asked a question \
directed at it, or asked to perform a task it owns (calendar lookups, \
appointment changes). It should stay silent when the humans address each \
other or exchange acknowledgments.";

/// Gatekeeper backed by a one-shot language service completion.
pub struct LlmGatekeeper {
    llm: Arc<dyn LanguageModel>,
}

impl LlmGatekeeper {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    fn render_prompt(recent: &[Message], last_speaker: Speaker) -> String {
        let start = recent.len().saturating_sub(ADVISOR_WINDOW);
        let mut lines = Vec::new();
        for message in &recent[start..] {
            if let MessageContent::Text(text) = &message.content {
                lines.push(format!("{:?}: {}", message.role, text));
            }
        }
        format!(
            "Recent conversation:\n{}\n\nLast speaker: {:?}\nShould the assistant respond?",
            lines.join("\n"),
            last_speaker
        )
    }

    fn parse_advice(raw: &str) -> Option<GateAdvice> {
        // The model may wrap the JSON in prose or a code fence
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        serde_json::from_str::<GateAdvice>(&raw[start..=end])
            .ok()
            .map(|advice| GateAdvice {
                confidence: advice.confidence.clamp(0.0, 1.0),
                ..advice
            })
    }
}

#[async_trait::async_trait]
impl ResponseGatekeeper for LlmGatekeeper {
    async fn advise(&self, recent: &[Message], last_speaker: Speaker) -> GateAdvice {
        let prompt = Self::render_prompt(recent, last_speaker);

        let completion = tokio::time::timeout(
            ADVISOR_TIMEOUT,
            self.llm.complete(ADVISOR_SYSTEM, &prompt),
        )
        .await;

        match completion {
            Ok(Ok(raw)) => match Self::parse_advice(&raw) {
                Some(advice) => {
                    debug!(
                        "gatekeeper: respond={} ({}, {:.2})",
                        advice.respond, advice.reason, advice.confidence
                    );
                    advice
                }
                None => {
                    warn!("gatekeeper returned unparseable advice: {}", raw);
                    GateAdvice::silent("unparseable advice")
                }
            },
            Ok(Err(e)) => {
                warn!("gatekeeper failed: {}", e);
                GateAdvice::silent("advisor failure")
            }
            Err(_) => {
                warn!("gatekeeper timed out after {:?}", ADVISOR_TIMEOUT);
                GateAdvice::silent("advisor timeout")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let advice = LlmGatekeeper::parse_advice(
            r#"{"respond": true, "reason": "addressed by name", "confidence": 0.9}"#,
        )
        .unwrap();
        assert!(advice.respond);
        assert_eq!(advice.reason, "addressed by name");
    }

    #[test]
    fn test_parse_fenced_json() {
        let advice = LlmGatekeeper::parse_advice(
            "```json\n{\"respond\": false, \"reason\": \"humans talking\", \"confidence\": 0.8}\n```",
        )
        .unwrap();
        assert!(!advice.respond);
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(LlmGatekeeper::parse_advice("no json here").is_none());
    }

    #[test]
    fn test_confidence_clamped() {
        let advice = LlmGatekeeper::parse_advice(
            r#"{"respond": true, "reason": "x", "confidence": 2.5}"#,
        )
        .unwrap();
        assert_eq!(advice.confidence, 1.0);
    }

    #[test]
    fn test_silent_default_shape() {
        let advice = GateAdvice::silent("advisor timeout");
        assert!(!advice.respond);
        assert_eq!(advice.confidence, 0.0);
    }
}
