//! Conversation model: an append-only typed message log with speaker labels
//! and partial-response truncation.
//!
//! Messages are totally ordered by append order with dense monotone indices.
//! The only mutation besides append is the promotion or drop of the
//! in-progress assistant buffer.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An interrupted assistant reply shorter than this is dropped instead of
/// being kept with the ` [interrupted]` suffix. Counted in codepoints.
const INTERRUPTED_KEEP_THRESHOLD: usize = 10;

pub const INTERRUPTED_SUFFIX: &str = " [interrupted]";

/// Which human is speaking, in conference mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Owner,
}

impl Speaker {
    pub fn prefix(&self) -> &'static str {
        match self {
            Speaker::Caller => "[CALLER]: ",
            Speaker::Owner => "[OWNER]: ",
        }
    }
}

/// One element of a structured assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        payload: serde_json::Value,
    },
}

/// Message content: plain text or a sequence of structured parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolCalls,
    ToolResults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub index: usize,
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<Speaker>,
}

/// A `(tool call id, payload)` pair recorded after tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultEntry {
    pub tool_call_id: String,
    pub payload: serde_json::Value,
}

/// Raw diarization id to speaker slot bindings, established lazily.
#[derive(Debug, Default, Clone)]
pub struct SpeakerBinding {
    caller_id: Option<u32>,
    owner_id: Option<u32>,
}

impl SpeakerBinding {
    /// Resolve a raw diarization id. The first id observed binds to the
    /// caller, the next distinct id to the owner. A further distinct id
    /// takes the owner slot only when it is still empty.
    pub fn resolve(&mut self, raw_id: u32) -> Option<Speaker> {
        if self.caller_id == Some(raw_id) {
            return Some(Speaker::Caller);
        }
        if self.owner_id == Some(raw_id) {
            return Some(Speaker::Owner);
        }
        if self.caller_id.is_none() {
            self.caller_id = Some(raw_id);
            debug!("bound diarization id {} to caller", raw_id);
            return Some(Speaker::Caller);
        }
        if self.owner_id.is_none() {
            self.owner_id = Some(raw_id);
            debug!("bound diarization id {} to owner", raw_id);
            return Some(Speaker::Owner);
        }
        warn!("ignoring third diarization id {} (both slots bound)", raw_id);
        None
    }
}

/// The per-session conversation log.
pub struct Conversation {
    messages: Vec<Message>,
    partial_assistant: Option<String>,
    speaker_binding: SpeakerBinding,
    /// Conference mode prefixes user text with the speaker tag.
    conference_mode: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            partial_assistant: None,
            speaker_binding: SpeakerBinding::default(),
            conference_mode: false,
        }
    }

    pub fn set_conference_mode(&mut self, enabled: bool) {
        self.conference_mode = enabled;
    }

    pub fn is_conference_mode(&self) -> bool {
        self.conference_mode
    }

    fn push(&mut self, role: Role, content: MessageContent, speaker: Option<Speaker>) {
        let index = self.messages.len();
        self.messages.push(Message {
            index,
            role,
            content,
            speaker,
        });
    }

    /// Append a user utterance. In conference mode the text is prefixed with
    /// the speaker tag for downstream LLM consumption.
    pub fn append_user(&mut self, text: &str, speaker: Option<Speaker>) {
        let content = match (self.conference_mode, speaker) {
            (true, Some(s)) => format!("{}{}", s.prefix(), text),
            _ => text.to_string(),
        };
        self.push(Role::User, MessageContent::Text(content), speaker);
    }

    /// Resolve a raw diarization id through the lazy binding.
    pub fn resolve_speaker(&mut self, raw_id: u32) -> Option<Speaker> {
        self.speaker_binding.resolve(raw_id)
    }

    /// Reset the in-progress assistant buffer for a new generation.
    pub fn start_assistant(&mut self) {
        self.partial_assistant = Some(String::new());
    }

    pub fn extend_assistant(&mut self, delta: &str) {
        match &mut self.partial_assistant {
            Some(buffer) => buffer.push_str(delta),
            None => {
                self.partial_assistant = Some(delta.to_string());
            }
        }
    }

    /// Promote the partial buffer to a finalized assistant message.
    pub fn finish_assistant(&mut self) {
        if let Some(text) = self.partial_assistant.take() {
            if !text.is_empty() {
                self.push(Role::Assistant, MessageContent::Text(text), None);
            }
        }
    }

    /// Promote an interrupted partial buffer, or drop it when too short to
    /// carry meaning.
    pub fn finish_assistant_interrupted(&mut self) {
        if let Some(text) = self.partial_assistant.take() {
            if text.chars().count() >= INTERRUPTED_KEEP_THRESHOLD {
                let annotated = format!("{text}{INTERRUPTED_SUFFIX}");
                self.push(Role::Assistant, MessageContent::Text(annotated), None);
            } else {
                debug!("dropping short interrupted reply ({} chars)", text.chars().count());
            }
        }
    }

    /// Append an assistant message with structured parts (tool calls stay in
    /// history).
    pub fn add_assistant_structured(&mut self, parts: Vec<ContentPart>) {
        self.push(Role::ToolCalls, MessageContent::Parts(parts), None);
    }

    pub fn add_tool_results(&mut self, results: Vec<ToolResultEntry>) {
        let parts = results
            .into_iter()
            .map(|r| ContentPart::ToolResult {
                tool_call_id: r.tool_call_id,
                payload: r.payload,
            })
            .collect();
        self.push(Role::ToolResults, MessageContent::Parts(parts), None);
    }

    /// A copy suitable for handing to the language service.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_partial_assistant(&self) -> bool {
        self.partial_assistant.is_some()
    }

    /// The last user message's speaker, recovered from the tag prefix.
    pub fn last_speaker(&self) -> Option<Speaker> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| match &m.content {
                MessageContent::Text(text) => {
                    if text.starts_with("[CALLER]: ") {
                        Some(Speaker::Caller)
                    } else if text.starts_with("[OWNER]: ") {
                        Some(Speaker::Owner)
                    } else {
                        m.speaker
                    }
                }
                MessageContent::Parts(_) => None,
            })
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
