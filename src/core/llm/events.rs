//! The typed event stream produced by a language service generation.

use serde::{Deserialize, Serialize};

/// Events produced by one streaming generation.
///
/// The set is closed over what the session handles; providers emitting a
/// kind we do not know map to `Unknown`, which is logged and skipped rather
/// than tearing the stream down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LlmEvent {
    /// Stream opened.
    Start,
    TextStart {
        id: String,
    },
    /// Text chunk routed to the conversation and to TTS.
    TextDelta {
        id: String,
        text: String,
    },
    TextEnd {
        id: String,
    },
    /// Model reasoning; logged, never spoken.
    Reasoning {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolResult {
        id: String,
        payload: serde_json::Value,
    },
    ToolError {
        id: String,
        message: String,
    },
    /// Stream ended normally.
    Finish {
        reason: String,
    },
    /// Stream ended with a fault.
    Error {
        message: String,
    },
    /// Stream cancelled cooperatively.
    Abort,
    /// An event kind this version does not know. Logged and skipped.
    Unknown {
        kind: String,
    },
}
