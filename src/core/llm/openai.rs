//! OpenAI-compatible streaming chat client.
//!
//! This is the only component that knows the provider's wire shape: the
//! internal conversation messages are converted at this boundary, and the
//! SSE stream is folded into the typed [`LlmEvent`] union. Tool calls are
//! executed through the injected dispatcher and fed back for a continuation
//! round, so the session only ever consumes events.

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::conversation::{ContentPart, Message, MessageContent, Role};

use super::{ChatRequest, LanguageModel, LlmError, LlmEvent, ToolDispatch, ToolSpec};

/// Channel depth for the event stream; the session consumes promptly.
const EVENT_CHANNEL_SIZE: usize = 64;
/// Tool-call rounds per generation; a runaway model is cut off here.
const MAX_TOOL_ROUNDS: usize = 8;

pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Convert internal messages to the provider's wire shape.
    fn to_wire(system: &str, messages: &[Message]) -> Vec<Value> {
        let mut wire = vec![json!({"role": "system", "content": system})];
        for message in messages {
            match (&message.role, &message.content) {
                (Role::User, MessageContent::Text(text)) => {
                    wire.push(json!({"role": "user", "content": text}));
                }
                (Role::Assistant, MessageContent::Text(text)) => {
                    wire.push(json!({"role": "assistant", "content": text}));
                }
                (Role::ToolCalls, MessageContent::Parts(parts)) => {
                    let mut content: Option<String> = None;
                    let mut tool_calls = Vec::new();
                    for part in parts {
                        match part {
                            ContentPart::Text { text } => content = Some(text.clone()),
                            ContentPart::ToolCall { id, name, args } => {
                                tool_calls.push(json!({
                                    "id": id,
                                    "type": "function",
                                    "function": {
                                        "name": name,
                                        "arguments": args.to_string(),
                                    }
                                }));
                            }
                            ContentPart::ToolResult { .. } => {}
                        }
                    }
                    wire.push(json!({
                        "role": "assistant",
                        "content": content,
                        "tool_calls": tool_calls,
                    }));
                }
                (Role::ToolResults, MessageContent::Parts(parts)) => {
                    for part in parts {
                        if let ContentPart::ToolResult { tool_call_id, payload } = part {
                            wire.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_call_id,
                                "content": payload.to_string(),
                            }));
                        }
                    }
                }
                other => {
                    warn!("skipping message with unexpected shape: {:?}", other.0);
                }
            }
        }
        wire
    }

    fn tools_wire(tools: &[ToolSpec]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect()
    }
}

/// One partially assembled tool call, keyed by stream index.
#[derive(Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Splits an SSE byte stream into complete `data:` payloads.
#[derive(Default)]
struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Outcome of one streaming round.
enum RoundOutcome {
    Finished(String),
    ToolCalls(Vec<PendingToolCall>),
    Aborted,
    Failed(String),
}

impl OpenAiChat {
    /// Drive one HTTP round of the stream, emitting events as they arrive.
    async fn run_round(
        &self,
        wire_messages: &[Value],
        tools: &[Value],
        round: usize,
        tx: &mpsc::Sender<LlmEvent>,
        token: &CancellationToken,
    ) -> RoundOutcome {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }

        let response = tokio::select! {
            result = self
                .client
                .post(self.completions_url())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send() => {
                match result {
                    Ok(resp) => resp,
                    Err(e) => return RoundOutcome::Failed(format!("request failed: {e}")),
                }
            }
            _ = token.cancelled() => return RoundOutcome::Aborted,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return RoundOutcome::Failed(format!("provider returned {status}: {body}"));
        }

        let text_id = round.to_string();
        let mut byte_stream = response.bytes_stream();
        let mut sse = SseBuffer::default();
        let mut pending_tools: Vec<PendingToolCall> = Vec::new();
        let mut text_started = false;
        let mut finish_reason: Option<String> = None;

        'stream: loop {
            let chunk = tokio::select! {
                chunk = byte_stream.next() => chunk,
                _ = token.cancelled() => return RoundOutcome::Aborted,
            };
            let chunk = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return RoundOutcome::Failed(format!("stream error: {e}")),
                None => break 'stream,
            };

            for payload in sse.push(&chunk) {
                if payload == "[DONE]" {
                    break 'stream;
                }
                let parsed: StreamChunk = match serde_json::from_str(&payload) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        debug!("skipping unparseable stream chunk: {}", e);
                        continue;
                    }
                };
                let Some(choice) = parsed.choices.into_iter().next() else {
                    continue;
                };

                if let Some(text) = choice.delta.reasoning_content {
                    let _ = tx.send(LlmEvent::Reasoning { text }).await;
                }

                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        if !text_started {
                            text_started = true;
                            let _ = tx.send(LlmEvent::TextStart { id: text_id.clone() }).await;
                        }
                        let _ = tx
                            .send(LlmEvent::TextDelta {
                                id: text_id.clone(),
                                text,
                            })
                            .await;
                    }
                }

                if let Some(deltas) = choice.delta.tool_calls {
                    for delta in deltas {
                        if pending_tools.len() <= delta.index {
                            pending_tools.resize_with(delta.index + 1, PendingToolCall::default);
                        }
                        let pending = &mut pending_tools[delta.index];
                        if let Some(id) = delta.id {
                            pending.id = id;
                        }
                        if let Some(function) = delta.function {
                            if let Some(name) = function.name {
                                pending.name = name;
                            }
                            if let Some(arguments) = function.arguments {
                                pending.arguments.push_str(&arguments);
                            }
                        }
                    }
                }

                if let Some(reason) = choice.finish_reason {
                    finish_reason = Some(reason);
                }
            }
        }

        if text_started {
            let _ = tx.send(LlmEvent::TextEnd { id: text_id }).await;
        }

        match finish_reason.as_deref() {
            Some("tool_calls") => RoundOutcome::ToolCalls(pending_tools),
            Some(reason) => RoundOutcome::Finished(reason.to_string()),
            None => RoundOutcome::Finished("stop".to_string()),
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiChat {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        executor: Arc<dyn ToolDispatch>,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<LlmEvent>, LlmError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let this = OpenAiChat {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
        };

        tokio::spawn(async move {
            let _ = tx.send(LlmEvent::Start).await;

            let mut wire_messages = OpenAiChat::to_wire(&request.system, &request.messages);
            let tools = OpenAiChat::tools_wire(&request.tools);

            for round in 0..MAX_TOOL_ROUNDS {
                match this.run_round(&wire_messages, &tools, round, &tx, &token).await {
                    RoundOutcome::Finished(reason) => {
                        let _ = tx.send(LlmEvent::Finish { reason }).await;
                        return;
                    }
                    RoundOutcome::Aborted => {
                        let _ = tx.send(LlmEvent::Abort).await;
                        return;
                    }
                    RoundOutcome::Failed(message) => {
                        let _ = tx.send(LlmEvent::Error { message }).await;
                        return;
                    }
                    RoundOutcome::ToolCalls(pending) => {
                        let mut call_specs = Vec::new();
                        for call in &pending {
                            let args: Value = serde_json::from_str(&call.arguments)
                                .unwrap_or_else(|_| json!({}));
                            let _ = tx
                                .send(LlmEvent::ToolCall {
                                    id: call.id.clone(),
                                    name: call.name.clone(),
                                    args: args.clone(),
                                })
                                .await;
                            call_specs.push((call.id.clone(), call.name.clone(), args));
                        }

                        // Echo the assistant's tool-call turn back on the wire
                        wire_messages.push(json!({
                            "role": "assistant",
                            "content": null,
                            "tool_calls": call_specs.iter().map(|(id, name, args)| json!({
                                "id": id,
                                "type": "function",
                                "function": {"name": name, "arguments": args.to_string()},
                            })).collect::<Vec<_>>(),
                        }));

                        for (id, name, args) in call_specs {
                            if token.is_cancelled() {
                                let _ = tx.send(LlmEvent::Abort).await;
                                return;
                            }
                            match executor.dispatch(&name, args).await {
                                Ok(payload) => {
                                    wire_messages.push(json!({
                                        "role": "tool",
                                        "tool_call_id": id,
                                        "content": payload.to_string(),
                                    }));
                                    let _ = tx.send(LlmEvent::ToolResult { id, payload }).await;
                                }
                                Err(message) => {
                                    wire_messages.push(json!({
                                        "role": "tool",
                                        "tool_call_id": id,
                                        "content": json!({"error": message}).to_string(),
                                    }));
                                    let _ = tx.send(LlmEvent::ToolError { id, message }).await;
                                }
                            }
                        }
                        // Next round continues with the tool results appended
                    }
                }
            }

            warn!("generation exceeded {} tool rounds, finishing", MAX_TOOL_ROUNDS);
            let _ = tx
                .send(LlmEvent::Finish {
                    reason: "tool_round_limit".to_string(),
                })
                .await;
        });

        Ok(rx)
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(LlmError::ProviderError(format!("provider returned {status}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::MalformedResponse("no content in response".to_string()))
    }
}
