//! Chat-completions provider adapter.
//!
//! Speaks the chat-completions wire format used by OpenAI and by most
//! local inference servers (LM Studio, Ollama, llama.cpp, vLLM). Text
//! arrives as content deltas; tool calls arrive as indexed argument
//! fragments that are accumulated byte-by-byte and JSON-decoded only once
//! the generation finishes; usage, when requested, arrives on a trailing
//! chunk after the finish marker, so the adapter defers its terminal
//! `Complete` until that chunk (or end of stream).

use crate::chunk::StreamChunk;
use crate::message::{
    AssistantPart, FinishReason, Message, ToolResultBody, ToolResultPart, Usage, UserContent,
    UserPart,
};
use crate::provider::{ChunkStream, GenerateRequest, ModelResponse, Provider};
use crate::tools::ToolSpec;
use crate::{Error, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Provider for chat-completions endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    /// Create a provider for `base_url` (e.g. `https://api.openai.com/v1`
    /// or `http://localhost:1234/v1`).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::config(
                "base_url must start with http:// or https://",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn build_body(&self, model: &str, request: &GenerateRequest, stream: bool) -> Value {
        let mut messages = Vec::new();

        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }

        for message in &request.messages {
            match message {
                Message::User { content } => messages.push(user_wire(content)),
                Message::Assistant(assistant) => {
                    let text = assistant.text();
                    let calls: Vec<Value> = assistant
                        .tool_calls()
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();

                    let mut wire = json!({"role": "assistant"});
                    wire["content"] = if text.is_empty() {
                        Value::Null
                    } else {
                        Value::String(text)
                    };
                    if !calls.is_empty() {
                        wire["tool_calls"] = Value::Array(calls);
                    }
                    messages.push(wire);
                }
                Message::Tool { results } => {
                    // One wire message per result, keyed by call id.
                    for result in results {
                        let content = match &result.body {
                            ToolResultBody::Text(text) => text.clone(),
                            ToolResultBody::Parts(parts) => parts
                                .iter()
                                .filter_map(|p| match p {
                                    ToolResultPart::Text { text } => Some(text.as_str()),
                                    ToolResultPart::Image { .. } => None,
                                })
                                .collect::<Vec<_>>()
                                .join("\n"),
                        };
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": result.call_id,
                            "content": content,
                        }));
                    }
                }
            }
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        if let Some(temperature) = request.options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = request.options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.options.stop.is_empty() {
            body["stop"] = json!(request.options.stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(tool_wire).collect());
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, "dispatching chat-completions request");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::provider(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }
}

fn user_wire(content: &UserContent) -> Value {
    match content {
        UserContent::Text(text) => json!({"role": "user", "content": text}),
        UserContent::Parts(parts) => {
            let wire_parts: Vec<Value> = parts
                .iter()
                .map(|part| match part {
                    UserPart::Text { text } => json!({"type": "text", "text": text}),
                    UserPart::File(file) => json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", file.mime_type, file.data)
                        }
                    }),
                })
                .collect();
            json!({"role": "user", "content": wire_parts})
        }
    }
}

fn tool_wire(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.schema,
        }
    })
}

// ---------------------------------------------------------------------------
// Wire chunk shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
struct WireChunk {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WireChoice {
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WireToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<WireUsage> for Usage {
    fn from(wire: WireUsage) -> Self {
        Usage {
            input_tokens: wire.prompt_tokens,
            output_tokens: wire.completion_tokens,
        }
    }
}

fn map_finish(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::FunctionCall,
        other => FinishReason::Custom(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Chunk translation state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ToolBuffer {
    part_index: u32,
    call_id: Option<String>,
    name: Option<String>,
    arguments: String,
    started: bool,
}

/// Per-call translation state from wire deltas to canonical chunks.
#[derive(Debug, Default)]
struct ChatAdapter {
    started: bool,
    next_part: u32,
    active_text: Option<u32>,
    /// Keyed by the wire-side tool index, which is unrelated to part index
    tools: HashMap<u32, ToolBuffer>,
    pending_finish: Option<FinishReason>,
}

impl ChatAdapter {
    fn on_chunk(&mut self, chunk: WireChunk) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();

        if !self.started && !chunk.id.is_empty() {
            self.started = true;
            out.push(StreamChunk::Start {
                id: chunk.id.clone(),
                model: chunk.model.clone(),
            });
        }

        // Usage rides a trailing chunk with no choices once the finish
        // marker has already been seen; that chunk finalizes the turn.
        if let (Some(reason), Some(usage)) = (&self.pending_finish, chunk.usage) {
            out.push(StreamChunk::Complete {
                finish_reason: reason.clone(),
                usage: usage.into(),
            });
            self.pending_finish = None;
            return Ok(out);
        }

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    let index = match self.active_text {
                        Some(index) => index,
                        None => {
                            let index = self.next_part;
                            self.next_part += 1;
                            self.active_text = Some(index);
                            out.push(StreamChunk::TextStart { index });
                            index
                        }
                    };
                    out.push(StreamChunk::TextDelta { index, text });
                }
            }

            if let Some(deltas) = choice.delta.tool_calls {
                // A tool call ends any open text part.
                if let Some(index) = self.active_text.take() {
                    out.push(StreamChunk::TextComplete { index });
                }
                for delta in deltas {
                    let next_part = &mut self.next_part;
                    let buffer = self.tools.entry(delta.index).or_insert_with(|| {
                        let part_index = *next_part;
                        *next_part += 1;
                        ToolBuffer {
                            part_index,
                            ..ToolBuffer::default()
                        }
                    });
                    if let Some(id) = delta.id {
                        buffer.call_id = Some(id);
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            buffer.name = Some(name);
                        }
                        if let Some(arguments) = function.arguments {
                            buffer.arguments.push_str(&arguments);
                        }
                    }
                    if !buffer.started {
                        if let (Some(call_id), Some(name)) = (&buffer.call_id, &buffer.name) {
                            buffer.started = true;
                            out.push(StreamChunk::ToolCallStart {
                                index: buffer.part_index,
                                call_id: call_id.clone(),
                                tool_name: name.clone(),
                            });
                        }
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                out.extend(self.flush_parts()?);
                let reason = map_finish(&reason);
                match chunk.usage {
                    Some(usage) => out.push(StreamChunk::Complete {
                        finish_reason: reason,
                        usage: usage.into(),
                    }),
                    None => self.pending_finish = Some(reason),
                }
            }
        }

        Ok(out)
    }

    /// Close the open text part and emit every buffered tool call in part
    /// order, decoding their accumulated argument strings.
    fn flush_parts(&mut self) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();

        if let Some(index) = self.active_text.take() {
            out.push(StreamChunk::TextComplete { index });
        }

        let mut buffers: Vec<ToolBuffer> = self.tools.drain().map(|(_, b)| b).collect();
        buffers.sort_by_key(|b| b.part_index);
        for buffer in buffers {
            let (Some(call_id), Some(name)) = (buffer.call_id, buffer.name) else {
                continue;
            };
            let arguments: Value = if buffer.arguments.is_empty() {
                json!({})
            } else {
                serde_json::from_str(&buffer.arguments).map_err(|e| {
                    Error::stream(format!(
                        "tool '{name}' arguments are not valid JSON: {e}"
                    ))
                })?
            };
            out.push(StreamChunk::ToolCallComplete {
                index: buffer.part_index,
                call_id,
                tool_name: name,
                arguments,
            });
        }

        Ok(out)
    }

    /// End of stream: emit the deferred finish if the trailing usage chunk
    /// never came.
    fn on_done(&mut self) -> Option<StreamChunk> {
        self.pending_finish.take().map(|reason| StreamChunk::Complete {
            finish_reason: reason,
            usage: Usage::default(),
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, model: &str, request: GenerateRequest) -> Result<ModelResponse> {
        let body = self.build_body(model, &request, false);
        let raw: Value = self.post(&body).await?.json().await?;

        let choice = raw
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| Error::provider("response has no choices"))?;
        let message = &choice["message"];

        let mut content = Vec::new();
        if let Some(text) = message["content"].as_str() {
            if !text.is_empty() {
                content.push(AssistantPart::text(text));
            }
        }
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let arguments_raw = call["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments: Value = if arguments_raw.is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(arguments_raw).map_err(|e| {
                        Error::stream(format!("tool arguments are not valid JSON: {e}"))
                    })?
                };
                content.push(AssistantPart::ToolCall(crate::message::ToolCallPart::new(
                    call["id"].as_str().unwrap_or_default(),
                    call["function"]["name"].as_str().unwrap_or_default(),
                    arguments,
                )));
            }
        }

        let finish_reason = choice["finish_reason"]
            .as_str()
            .map(map_finish)
            .unwrap_or(FinishReason::Stop);
        let usage = raw
            .get("usage")
            .and_then(|u| serde_json::from_value::<WireUsage>(u.clone()).ok())
            .map(Usage::from)
            .unwrap_or_default();

        Ok(ModelResponse {
            id: raw["id"].as_str().unwrap_or_default().to_string(),
            model: raw["model"].as_str().unwrap_or(model).to_string(),
            content,
            finish_reason,
            usage,
            raw: Some(raw),
        })
    }

    async fn stream(
        &self,
        model: &str,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream> {
        let body = self.build_body(model, &request, true);
        let response = self.post(&body).await?;
        let mut events = Box::pin(response.bytes_stream().eventsource());

        let stream = async_stream::stream! {
            let mut adapter = ChatAdapter::default();
            loop {
                let event = tokio::select! {
                    biased;
                    // Dropping the event source aborts the connection.
                    _ = cancel.cancelled() => break,
                    event = events.next() => event,
                };
                let Some(event) = event else {
                    if let Some(chunk) = adapter.on_done() {
                        yield Ok(chunk);
                    }
                    break;
                };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(Error::stream(format!("SSE transport error: {e}")));
                        break;
                    }
                };
                if event.data == "[DONE]" {
                    if let Some(chunk) = adapter.on_done() {
                        yield Ok(chunk);
                    }
                    break;
                }
                let wire: WireChunk = match serde_json::from_str(&event.data) {
                    Ok(wire) => wire,
                    Err(e) => {
                        yield Err(Error::stream(format!("malformed chunk: {e}")));
                        break;
                    }
                };
                match adapter.on_chunk(wire) {
                    Ok(chunks) => {
                        let mut terminal = false;
                        for chunk in chunks {
                            terminal = terminal || chunk.is_terminal();
                            yield Ok(chunk);
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
