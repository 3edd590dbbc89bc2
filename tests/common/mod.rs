//! Shared test fixtures: a scriptable stub provider.
#![allow(dead_code)]

use async_trait::async_trait;
use axle::{
    CancellationToken, ChunkStream, Error, FinishReason, GenerateRequest, Message, ModelResponse,
    Provider, Result, StreamChunk, StreamReducer, Usage,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the stub picks a script for a call.
enum Scripts {
    /// Scripts consumed in call order.
    Sequential(Mutex<VecDeque<Vec<StreamChunk>>>),
    /// First script whose key is a substring of the latest user text; the
    /// script is reusable. Robust against nondeterministic call order from
    /// concurrent graph nodes.
    Keyed(Vec<(String, Vec<StreamChunk>)>),
}

/// A provider that replays canned chunk scripts.
pub struct StubProvider {
    scripts: Scripts,
    /// Per-chunk delay, to widen cancellation and concurrency windows
    chunk_delay: Option<Duration>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: AtomicUsize,
}

impl StubProvider {
    /// Scripts replayed in call order.
    pub fn sequential(scripts: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            scripts: Scripts::Sequential(Mutex::new(scripts.into())),
            chunk_delay: None,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Scripts selected by substring match against the latest user text.
    pub fn keyed(scripts: Vec<(&str, Vec<StreamChunk>)>) -> Self {
        Self {
            scripts: Scripts::Keyed(
                scripts
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            chunk_delay: None,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long before each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Highest number of concurrently open streams observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total number of `stream`/`generate` calls.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_script(&self, request: &GenerateRequest) -> Result<Vec<StreamChunk>> {
        match &self.scripts {
            Scripts::Sequential(queue) => queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::other("stub provider ran out of scripts")),
            Scripts::Keyed(entries) => {
                let text = latest_user_text(request);
                entries
                    .iter()
                    .find(|(key, _)| text.contains(key))
                    .map(|(_, script)| script.clone())
                    .ok_or_else(|| {
                        Error::other(format!("no stub script matches prompt: {text}"))
                    })
            }
        }
    }
}

fn latest_user_text(request: &GenerateRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find_map(|message| match message {
            Message::User { content } => Some(content.text()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Decrements the active-stream counter when the stream is dropped.
struct FlightGuard {
    active: Arc<AtomicUsize>,
}

impl FlightGuard {
    fn enter(active: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, model: &str, request: GenerateRequest) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.next_script(&request)?;

        let mut reducer = StreamReducer::new();
        for chunk in &script {
            reducer.apply(chunk)?;
        }
        let message = reducer.snapshot();
        Ok(ModelResponse {
            id: message.id.clone(),
            model: message.model.clone().unwrap_or_else(|| model.to_string()),
            content: message.content,
            finish_reason: message.finish_reason.unwrap_or(FinishReason::Stop),
            usage: reducer.usage(),
            raw: None,
        })
    }

    async fn stream(
        &self,
        _model: &str,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.next_script(&request)?;
        let delay = self.chunk_delay;
        let guard = FlightGuard::enter(&self.active, &self.peak);

        let stream = async_stream::stream! {
            let _guard = guard;
            for chunk in script {
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                yield Ok(chunk);
            }
        };
        Ok(Box::pin(stream))
    }
}

/// A one-turn text script: start, one text part, stop.
pub fn text_turn(text: &str) -> Vec<StreamChunk> {
    vec![
        StreamChunk::Start {
            id: "stub-msg".to_string(),
            model: "stub-model".to_string(),
        },
        StreamChunk::TextStart { index: 0 },
        StreamChunk::TextDelta {
            index: 0,
            text: text.to_string(),
        },
        StreamChunk::TextComplete { index: 0 },
        StreamChunk::Complete {
            finish_reason: FinishReason::Stop,
            usage: Usage {
                input_tokens: 1,
                output_tokens: 1,
            },
        },
    ]
}

/// A one-turn script ending in a single tool call.
pub fn tool_call_turn(call_id: &str, tool_name: &str, arguments: Value) -> Vec<StreamChunk> {
    vec![
        StreamChunk::Start {
            id: "stub-msg".to_string(),
            model: "stub-model".to_string(),
        },
        StreamChunk::ToolCallStart {
            index: 0,
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
        },
        StreamChunk::ToolCallComplete {
            index: 0,
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments,
        },
        StreamChunk::Complete {
            finish_reason: FinishReason::FunctionCall,
            usage: Usage {
                input_tokens: 1,
                output_tokens: 1,
            },
        },
    ]
}

/// A `<response>…</response>` text turn, the shape graph instructions
/// parse by default in these tests.
pub fn response_turn(value: &str) -> Vec<StreamChunk> {
    text_turn(&format!("<response>{value}</response>"))
}
