//! Native multipart provider adapter.
//!
//! This wire family streams a message as explicitly indexed content
//! blocks: `message_start`, then per-block `content_block_start` /
//! `content_block_delta` / `content_block_stop`, then a `message_delta`
//! carrying the stop reason and output usage, and finally `message_stop`.
//! Blocks may be text, thinking (with a signature the conversation must
//! echo back), redacted thinking, or tool use with arguments streamed as
//! partial JSON. The block index maps directly onto the canonical part
//! index.
//!
//! The stop reason and output-token usage arrive on `message_delta`,
//! *before* the closing `message_stop`; the adapter holds them and emits
//! the terminal `Complete` only at `message_stop`.

use crate::chunk::StreamChunk;
use crate::message::{
    AssistantPart, FileCategory, FinishReason, Message, ToolResultBody, ToolResultPart, Usage,
    UserContent, UserPart,
};
use crate::provider::{ChunkStream, GenerateRequest, ModelResponse, Provider};
use crate::tools::ToolSpec;
use crate::{Error, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const WIRE_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Provider for the native multipart wire format.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::config("API key must not be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn build_body(&self, model: &str, request: &GenerateRequest, stream: bool) -> Value {
        let mut messages = Vec::new();

        for message in &request.messages {
            match message {
                Message::User { content } => {
                    messages.push(json!({"role": "user", "content": user_blocks(content)}));
                }
                Message::Assistant(assistant) => {
                    let blocks: Vec<Value> = assistant
                        .content
                        .iter()
                        .filter_map(assistant_block)
                        .collect();
                    if !blocks.is_empty() {
                        messages.push(json!({"role": "assistant", "content": blocks}));
                    }
                }
                Message::Tool { results } => {
                    // Tool results travel as user-role tool_result blocks.
                    let blocks: Vec<Value> = results
                        .iter()
                        .map(|result| {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": result.call_id,
                                "content": result_body(&result.body),
                            })
                        })
                        .collect();
                    messages.push(json!({"role": "user", "content": blocks}));
                }
            }
        }

        let mut body = json!({
            "model": model,
            "max_tokens": request.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
            "stream": stream,
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.options.top_p {
            body["top_p"] = json!(top_p);
        }
        if !request.options.stop.is_empty() {
            body["stop_sequences"] = json!(request.options.stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|spec: &ToolSpec| {
                        json!({
                            "name": spec.name,
                            "description": spec.description,
                            "input_schema": spec.schema,
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);
        debug!(%url, "dispatching messages request");
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", WIRE_VERSION)
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

fn user_blocks(content: &UserContent) -> Value {
    match content {
        UserContent::Text(text) => json!([{"type": "text", "text": text}]),
        UserContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    UserPart::Text { text } => json!({"type": "text", "text": text}),
                    UserPart::File(file) => match file.category {
                        FileCategory::Image => json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": file.mime_type,
                                "data": file.data,
                            }
                        }),
                        FileCategory::Document | FileCategory::Text => json!({
                            "type": "document",
                            "source": {
                                "type": "base64",
                                "media_type": file.mime_type,
                                "data": file.data,
                            }
                        }),
                    },
                })
                .collect(),
        ),
    }
}

fn assistant_block(part: &AssistantPart) -> Option<Value> {
    match part {
        AssistantPart::Text { text } => Some(json!({"type": "text", "text": text})),
        AssistantPart::Thinking {
            text,
            redacted,
            signature,
            ..
        } => {
            if *redacted {
                // Redacted blocks round-trip their signature as data.
                Some(json!({
                    "type": "redacted_thinking",
                    "data": signature.clone().unwrap_or_default(),
                }))
            } else {
                Some(json!({
                    "type": "thinking",
                    "thinking": text,
                    "signature": signature.clone().unwrap_or_default(),
                }))
            }
        }
        AssistantPart::ToolCall(call) => Some(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.arguments,
        })),
    }
}

fn result_body(body: &ToolResultBody) -> Value {
    match body {
        ToolResultBody::Text(text) => json!(text),
        ToolResultBody::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ToolResultPart::Text { text } => json!({"type": "text", "text": text}),
                    ToolResultPart::Image { data, mime_type } => json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": mime_type,
                            "data": data,
                        }
                    }),
                })
                .collect(),
        ),
    }
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::FunctionCall,
        other => FinishReason::Custom(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Wire event shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: WireMessageStart },
    #[serde(rename = "content_block_start")]
    ContentBlockStart { index: u32, content_block: WireBlock },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: u32, delta: WireDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: u32 },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: WireMessageDelta,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "error")]
    ErrorEvent { error: WireError },
}

#[derive(Debug, Deserialize)]
struct WireMessageStart {
    id: String,
    model: String,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireBlock {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "thinking")]
    Thinking,
    #[serde(rename = "redacted_thinking")]
    RedactedThinking,
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireDelta {
    #[serde(rename = "text_delta")]
    Text { text: String },
    #[serde(rename = "thinking_delta")]
    Thinking { thinking: String },
    #[serde(rename = "signature_delta")]
    Signature { signature: String },
    #[serde(rename = "input_json_delta")]
    InputJson { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct WireMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Chunk translation state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

#[derive(Debug)]
struct OpenBlock {
    kind: BlockKind,
    call_id: String,
    tool_name: String,
    arguments: String,
    signature: Option<String>,
}

/// Translation state from wire events to canonical chunks.
#[derive(Debug, Default)]
struct MultipartAdapter {
    blocks: HashMap<u32, OpenBlock>,
    input_usage: Usage,
    pending: Option<(FinishReason, Usage)>,
}

impl MultipartAdapter {
    fn on_event(&mut self, event: WireEvent) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();

        match event {
            WireEvent::Ping => {}
            WireEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_usage.input_tokens = usage.input_tokens;
                }
                out.push(StreamChunk::Start {
                    id: message.id,
                    model: message.model,
                });
            }
            WireEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                WireBlock::Text => {
                    self.blocks.insert(index, OpenBlock::new(BlockKind::Text));
                    out.push(StreamChunk::TextStart { index });
                }
                WireBlock::Thinking => {
                    self.blocks
                        .insert(index, OpenBlock::new(BlockKind::Thinking));
                    out.push(StreamChunk::ThinkingStart {
                        index,
                        id: None,
                        redacted: false,
                    });
                }
                WireBlock::RedactedThinking => {
                    self.blocks
                        .insert(index, OpenBlock::new(BlockKind::Thinking));
                    out.push(StreamChunk::ThinkingStart {
                        index,
                        id: None,
                        redacted: true,
                    });
                }
                WireBlock::ToolUse { id, name } => {
                    let mut block = OpenBlock::new(BlockKind::ToolUse);
                    block.call_id = id.clone();
                    block.tool_name = name.clone();
                    self.blocks.insert(index, block);
                    out.push(StreamChunk::ToolCallStart {
                        index,
                        call_id: id,
                        tool_name: name,
                    });
                }
            },
            WireEvent::ContentBlockDelta { index, delta } => match delta {
                WireDelta::Text { text } => out.push(StreamChunk::TextDelta { index, text }),
                WireDelta::Thinking { thinking } => out.push(StreamChunk::ThinkingDelta {
                    index,
                    text: thinking,
                }),
                WireDelta::Signature { signature } => {
                    if let Some(block) = self.blocks.get_mut(&index) {
                        block.signature = Some(signature);
                    }
                }
                WireDelta::InputJson { partial_json } => {
                    if let Some(block) = self.blocks.get_mut(&index) {
                        block.arguments.push_str(&partial_json);
                    }
                }
            },
            WireEvent::ContentBlockStop { index } => {
                let Some(block) = self.blocks.remove(&index) else {
                    return Err(Error::stream(format!(
                        "content_block_stop for unknown block {index}"
                    )));
                };
                match block.kind {
                    BlockKind::Text => out.push(StreamChunk::TextComplete { index }),
                    BlockKind::Thinking => out.push(StreamChunk::ThinkingComplete {
                        index,
                        signature: block.signature,
                    }),
                    BlockKind::ToolUse => {
                        let arguments: Value = if block.arguments.is_empty() {
                            json!({})
                        } else {
                            serde_json::from_str(&block.arguments).map_err(|e| {
                                Error::stream(format!(
                                    "tool '{}' arguments are not valid JSON: {e}",
                                    block.tool_name
                                ))
                            })?
                        };
                        out.push(StreamChunk::ToolCallComplete {
                            index,
                            call_id: block.call_id,
                            tool_name: block.tool_name,
                            arguments,
                        });
                    }
                }
            }
            WireEvent::MessageDelta { delta, usage } => {
                // Stop reason and output usage land here; the terminal
                // chunk waits for message_stop.
                let reason = delta
                    .stop_reason
                    .as_deref()
                    .map(map_stop_reason)
                    .unwrap_or(FinishReason::Stop);
                let mut total = self.input_usage;
                if let Some(usage) = usage {
                    total.output_tokens = usage.output_tokens;
                }
                self.pending = Some((reason, total));
            }
            WireEvent::MessageStop => {
                let (finish_reason, usage) = self
                    .pending
                    .take()
                    .unwrap_or((FinishReason::Stop, self.input_usage));
                out.push(StreamChunk::Complete {
                    finish_reason,
                    usage,
                });
            }
            WireEvent::ErrorEvent { error } => {
                out.push(StreamChunk::Error {
                    error_type: error.kind,
                    message: error.message,
                    usage: None,
                });
            }
        }

        Ok(out)
    }
}

impl OpenBlock {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            call_id: String::new(),
            tool_name: String::new(),
            arguments: String::new(),
            signature: None,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, model: &str, request: GenerateRequest) -> Result<ModelResponse> {
        let body = self.build_body(model, &request, false);
        let raw: Value = self.post(&body).await?.json().await?;

        let mut content = Vec::new();
        for block in raw["content"].as_array().cloned().unwrap_or_default() {
            match block["type"].as_str() {
                Some("text") => {
                    content.push(AssistantPart::text(block["text"].as_str().unwrap_or("")));
                }
                Some("thinking") => content.push(AssistantPart::Thinking {
                    text: block["thinking"].as_str().unwrap_or("").to_string(),
                    id: None,
                    redacted: false,
                    signature: block["signature"].as_str().map(str::to_string),
                }),
                Some("redacted_thinking") => content.push(AssistantPart::Thinking {
                    text: String::new(),
                    id: None,
                    redacted: true,
                    signature: block["data"].as_str().map(str::to_string),
                }),
                Some("tool_use") => {
                    content.push(AssistantPart::ToolCall(crate::message::ToolCallPart::new(
                        block["id"].as_str().unwrap_or_default(),
                        block["name"].as_str().unwrap_or_default(),
                        block["input"].clone(),
                    )));
                }
                _ => {}
            }
        }

        let finish_reason = raw["stop_reason"]
            .as_str()
            .map(map_stop_reason)
            .unwrap_or(FinishReason::Stop);
        let usage = Usage {
            input_tokens: raw["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: raw["usage"]["output_tokens"].as_u64().unwrap_or(0),
        };

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
            let mut adapter = MultipartAdapter::default();
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.next() => event,
                };
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(Error::stream(format!("SSE transport error: {e}")));
                        break;
                    }
                };
                let wire: WireEvent = match serde_json::from_str(&event.data) {
                    Ok(wire) => wire,
                    Err(e) => {
                        yield Err(Error::stream(format!("malformed event: {e}")));
                        break;
                    }
                };
                match adapter.on_event(wire) {
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
