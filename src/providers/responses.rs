//! Responses/events provider adapter.
//!
//! This wire family streams a response as a sequence of typed events over
//! SSE: the response is created, output items (messages, reasoning
//! sections, function calls) are added one at a time, text and argument
//! deltas reference their item by output index, items are closed, and a
//! final `response.completed` event carries usage. The adapter maps each
//! output item onto one canonical part, assigning part indices in item
//! arrival order.

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
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Provider for responses/events endpoints.
#[derive(Debug, Clone)]
pub struct ResponsesProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ResponsesProvider {
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
        let mut input = Vec::new();

        for message in &request.messages {
            match message {
                Message::User { content } => input.push(user_item(content)),
                Message::Assistant(assistant) => {
                    let text = assistant.text();
                    if !text.is_empty() {
                        input.push(json!({
                            "role": "assistant",
                            "content": [{"type": "output_text", "text": text}],
                        }));
                    }
                    for call in assistant.tool_calls() {
                        input.push(json!({
                            "type": "function_call",
                            "call_id": call.id,
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }));
                    }
                }
                Message::Tool { results } => {
                    for result in results {
                        let output = match &result.body {
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
                        input.push(json!({
                            "type": "function_call_output",
                            "call_id": result.call_id,
                            "output": output,
                        }));
                    }
                }
            }
        }

        let mut body = json!({
            "model": model,
            "input": input,
            "stream": stream,
        });
        if let Some(system) = &request.system {
            body["instructions"] = json!(system);
        }
        if let Some(temperature) = request.options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = request.options.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|spec: &ToolSpec| {
                        json!({
                            "type": "function",
                            "name": spec.name,
                            "description": spec.description,
                            "parameters": spec.schema,
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/responses", self.base_url);
        debug!(%url, "dispatching responses request");
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

fn user_item(content: &UserContent) -> Value {
    match content {
        UserContent::Text(text) => json!({
            "role": "user",
            "content": [{"type": "input_text", "text": text}],
        }),
        UserContent::Parts(parts) => {
            let wire: Vec<Value> = parts
                .iter()
                .map(|part| match part {
                    UserPart::Text { text } => json!({"type": "input_text", "text": text}),
                    UserPart::File(file) => json!({
                        "type": "input_image",
                        "image_url": format!("data:{};base64,{}", file.mime_type, file.data),
                    }),
                })
                .collect();
            json!({"role": "user", "content": wire})
        }
    }
}

// ---------------------------------------------------------------------------
// Wire event shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "response.created")]
    Created { response: WireResponseHead },
    #[serde(rename = "response.output_item.added")]
    ItemAdded { output_index: u32, item: WireItem },
    #[serde(rename = "response.output_text.delta")]
    TextDelta { output_index: u32, delta: String },
    #[serde(rename = "response.output_text.done")]
    TextDone { output_index: u32 },
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningDelta { output_index: u32, delta: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    ArgumentsDelta { output_index: u32, delta: String },
    #[serde(rename = "response.output_item.done")]
    ItemDone { output_index: u32 },
    #[serde(rename = "response.completed")]
    Completed { response: WireResponseTail },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: WireResponseTail },
    #[serde(rename = "response.failed")]
    Failed { response: WireFailure },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct WireResponseHead {
    id: String,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseTail {
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    incomplete_details: Option<WireIncomplete>,
}

#[derive(Debug, Deserialize)]
struct WireIncomplete {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireFailure {
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Chunk translation state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum ItemKind {
    Message,
    Reasoning,
    FunctionCall { call_id: String, name: String },
}

#[derive(Debug)]
struct OpenItem {
    part_index: u32,
    kind: ItemKind,
    arguments: String,
}

/// Translation state from wire events to canonical chunks.
#[derive(Debug, Default)]
struct ResponsesAdapter {
    next_part: u32,
    items: HashMap<u32, OpenItem>,
    saw_function_call: bool,
}

impl ResponsesAdapter {
    fn on_event(&mut self, event: WireEvent) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();

        match event {
            WireEvent::Ignored => {}
            WireEvent::Created { response } => {
                out.push(StreamChunk::Start {
                    id: response.id,
                    model: response.model,
                });
            }
            WireEvent::ItemAdded { output_index, item } => {
                let part_index = self.next_part;
                self.next_part += 1;

                let kind = match item.kind.as_str() {
                    "function_call" => {
                        let call_id = item.call_id.or(item.id).unwrap_or_default();
                        let name = item.name.unwrap_or_default();
                        out.push(StreamChunk::ToolCallStart {
                            index: part_index,
                            call_id: call_id.clone(),
                            tool_name: name.clone(),
                        });
                        self.saw_function_call = true;
                        ItemKind::FunctionCall { call_id, name }
                    }
                    "reasoning" => {
                        out.push(StreamChunk::ThinkingStart {
                            index: part_index,
                            id: item.id,
                            redacted: false,
                        });
                        ItemKind::Reasoning
                    }
                    _ => {
                        out.push(StreamChunk::TextStart { index: part_index });
                        ItemKind::Message
                    }
                };

                self.items.insert(
                    output_index,
                    OpenItem {
                        part_index,
                        kind,
                        arguments: String::new(),
                    },
                );
            }
            WireEvent::TextDelta {
                output_index,
                delta,
            } => {
                let item = self.item(output_index)?;
                out.push(StreamChunk::TextDelta {
                    index: item.part_index,
                    text: delta,
                });
            }
            WireEvent::TextDone { output_index } => {
                let item = self.item(output_index)?;
                out.push(StreamChunk::TextComplete {
                    index: item.part_index,
                });
            }
            WireEvent::ReasoningDelta {
                output_index,
                delta,
            } => {
                let item = self.item(output_index)?;
                out.push(StreamChunk::ThinkingDelta {
                    index: item.part_index,
                    text: delta,
                });
            }
            WireEvent::ArgumentsDelta {
                output_index,
                delta,
            } => {
                self.item_mut(output_index)?.arguments.push_str(&delta);
            }
            WireEvent::ItemDone { output_index } => {
                let Some(item) = self.items.remove(&output_index) else {
                    return Err(Error::stream(format!(
                        "output_item.done for unknown item {output_index}"
                    )));
                };
                match item.kind {
                    ItemKind::Message => {
                        // output_text.done already closed the part.
                    }
                    ItemKind::Reasoning => out.push(StreamChunk::ThinkingComplete {
                        index: item.part_index,
                        signature: None,
                    }),
                    ItemKind::FunctionCall { call_id, name } => {
                        let arguments: Value = if item.arguments.is_empty() {
                            json!({})
                        } else {
                            serde_json::from_str(&item.arguments).map_err(|e| {
                                Error::stream(format!(
                                    "tool '{name}' arguments are not valid JSON: {e}"
                                ))
                            })?
                        };
                        out.push(StreamChunk::ToolCallComplete {
                            index: item.part_index,
                            call_id,
                            tool_name: name,
                            arguments,
                        });
                    }
                }
            }
            WireEvent::Completed { response } => {
                out.push(StreamChunk::Complete {
                    finish_reason: if self.saw_function_call {
                        FinishReason::FunctionCall
                    } else {
                        FinishReason::Stop
                    },
                    usage: response.usage.map(Usage::from).unwrap_or_default(),
                });
            }
            WireEvent::Incomplete { response } => {
                let reason = response
                    .incomplete_details
                    .map(|d| d.reason)
                    .unwrap_or_default();
                out.push(StreamChunk::Complete {
                    finish_reason: if reason == "max_output_tokens" {
                        FinishReason::Length
                    } else {
                        FinishReason::Custom(reason)
                    },
                    usage: response.usage.map(Usage::from).unwrap_or_default(),
                });
            }
            WireEvent::Failed { response } => {
                let error = response.error.unwrap_or(WireError {
                    code: "unknown".to_string(),
                    message: "response failed".to_string(),
                });
                out.push(StreamChunk::Error {
                    error_type: error.code,
                    message: error.message,
                    usage: None,
                });
            }
        }

        Ok(out)
    }

    fn item(&self, output_index: u32) -> Result<&OpenItem> {
        self.items.get(&output_index).ok_or_else(|| {
            Error::stream(format!("delta for unknown output item {output_index}"))
        })
    }

    fn item_mut(&mut self, output_index: u32) -> Result<&mut OpenItem> {
        self.items.get_mut(&output_index).ok_or_else(|| {
            Error::stream(format!("delta for unknown output item {output_index}"))
        })
    }
}

impl From<WireUsage> for Usage {
    fn from(wire: WireUsage) -> Self {
        Usage {
            input_tokens: wire.input_tokens,
            output_tokens: wire.output_tokens,
        }
    }
}

#[async_trait]
impl Provider for ResponsesProvider {
    fn name(&self) -> &str {
        "responses"
    }

    async fn generate(&self, model: &str, request: GenerateRequest) -> Result<ModelResponse> {
        let body = self.build_body(model, &request, false);
        let raw: Value = self.post(&body).await?.json().await?;

        let mut content = Vec::new();
        let mut saw_function_call = false;
        for item in raw["output"].as_array().cloned().unwrap_or_default() {
            match item["type"].as_str() {
                Some("message") => {
                    for block in item["content"].as_array().cloned().unwrap_or_default() {
                        if block["type"] == "output_text" {
                            content.push(AssistantPart::text(
                                block["text"].as_str().unwrap_or(""),
                            ));
                        }
                    }
                }
                Some("function_call") => {
                    saw_function_call = true;
                    let arguments_raw = item["arguments"].as_str().unwrap_or("{}");
                    let arguments: Value = if arguments_raw.is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(arguments_raw).map_err(|e| {
                            Error::stream(format!("tool arguments are not valid JSON: {e}"))
                        })?
                    };
                    content.push(AssistantPart::ToolCall(crate::message::ToolCallPart::new(
                        item["call_id"].as_str().unwrap_or_default(),
                        item["name"].as_str().unwrap_or_default(),
                        arguments,
                    )));
                }
                _ => {}
            }
        }

        let usage = raw
            .get("usage")
            .and_then(|u| serde_json::from_value::<WireUsage>(u.clone()).ok())
            .map(Usage::from)
            .unwrap_or_default();

        Ok(ModelResponse {
            id: raw["id"].as_str().unwrap_or_default().to_string(),
            model: raw["model"].as_str().unwrap_or(model).to_string(),
            content,
            finish_reason: if saw_function_call {
                FinishReason::FunctionCall
            } else {
                FinishReason::Stop
            },
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
            let mut adapter = ResponsesAdapter::default();
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
                if event.data == "[DONE]" {
                    break;
                }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json_text: &str) -> WireEvent {
        serde_json::from_str(json_text).unwrap()
    }

    #[test]
    fn test_item_lifecycle_assigns_part_indices_in_arrival_order() {
        let mut adapter = ResponsesAdapter::default();

        adapter
            .on_event(event(
                r#"{"type":"response.created","response":{"id":"r1","model":"test"}}"#,
            ))
            .unwrap();

        let chunks = adapter
            .on_event(event(
                r#"{"type":"response.output_item.added","output_index":0,"item":{"type":"reasoning","id":"rs_1"}}"#,
            ))
            .unwrap();
        assert!(matches!(chunks[0], StreamChunk::ThinkingStart { index: 0, .. }));

        let chunks = adapter
            .on_event(event(
                r#"{"type":"response.output_item.added","output_index":1,"item":{"type":"message"}}"#,
            ))
            .unwrap();
        assert!(matches!(chunks[0], StreamChunk::TextStart { index: 1 }));

        let chunks = adapter
            .on_event(event(
                r#"{"type":"response.output_text.delta","output_index":1,"delta":"hi"}"#,
            ))
            .unwrap();
        assert!(matches!(
            &chunks[0],
            StreamChunk::TextDelta { index: 1, text } if text == "hi"
        ));
    }

    #[test]
    fn test_function_call_arguments_accumulate_across_deltas() {
        let mut adapter = ResponsesAdapter::default();
        adapter
            .on_event(event(
                r#"{"type":"response.output_item.added","output_index":0,"item":{"type":"function_call","call_id":"c1","name":"calc"}}"#,
            ))
            .unwrap();

        for fragment in [r#"{"a""#, r#":1}"#] {
            adapter
                .on_event(event(&format!(
                    r#"{{"type":"response.function_call_arguments.delta","output_index":0,"delta":{}}}"#,
                    serde_json::to_string(fragment).unwrap()
                )))
                .unwrap();
        }

        let chunks = adapter
            .on_event(event(
                r#"{"type":"response.output_item.done","output_index":0}"#,
            ))
            .unwrap();
        assert!(matches!(
            &chunks[0],
            StreamChunk::ToolCallComplete { call_id, arguments, .. }
                if call_id == "c1" && *arguments == json!({"a": 1})
        ));
    }

    #[test]
    fn test_completed_reports_function_call_when_one_was_emitted() {
        let mut adapter = ResponsesAdapter::default();
        adapter
            .on_event(event(
                r#"{"type":"response.output_item.added","output_index":0,"item":{"type":"function_call","call_id":"c1","name":"calc"}}"#,
            ))
            .unwrap();
        adapter
            .on_event(event(
                r#"{"type":"response.output_item.done","output_index":0}"#,
            ))
            .unwrap();

        let chunks = adapter
            .on_event(event(
                r#"{"type":"response.completed","response":{"usage":{"input_tokens":4,"output_tokens":9}}}"#,
            ))
            .unwrap();
        assert!(matches!(
            chunks[0],
            StreamChunk::Complete {
                finish_reason: FinishReason::FunctionCall,
                usage,
            } if usage.input_tokens == 4 && usage.output_tokens == 9
        ));
    }

    #[test]
    fn test_incomplete_maps_token_limit_to_length() {
        let mut adapter = ResponsesAdapter::default();
        let chunks = adapter
            .on_event(event(
                r#"{"type":"response.incomplete","response":{"incomplete_details":{"reason":"max_output_tokens"}}}"#,
            ))
            .unwrap();
        assert!(matches!(
            chunks[0],
            StreamChunk::Complete {
                finish_reason: FinishReason::Length,
                ..
            }
        ));
    }

    #[test]
    fn test_failed_becomes_error_chunk() {
        let mut adapter = ResponsesAdapter::default();
        let chunks = adapter
            .on_event(event(
                r#"{"type":"response.failed","response":{"error":{"code":"server_error","message":"boom"}}}"#,
            ))
            .unwrap();
        assert!(matches!(
            &chunks[0],
            StreamChunk::Error { error_type, message, .. }
                if error_type == "server_error" && message == "boom"
        ));
    }

    #[test]
    fn test_unknown_events_ignored() {
        let mut adapter = ResponsesAdapter::default();
        let chunks = adapter
            .on_event(event(r#"{"type":"response.in_progress"}"#))
            .unwrap();
        assert!(chunks.is_empty());
    }
}
