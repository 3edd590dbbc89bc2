//! Stream reducer: folds canonical chunks into an assistant message.
//!
//! The reducer is a per-call state machine. A provider adapter translates
//! its native wire events into [`StreamChunk`]s; the reducer ingests them
//! and maintains the partial assistant message, the finish reason, usage
//! counters and a terminal status. It has three public faces:
//!
//! 1. **Event pass-through**: every chunk is forwarded to each subscriber
//!    of a [`ChunkFanout`] in production order, before it is applied to the
//!    reducer state. Subscribers are invoked synchronously on the stream's
//!    progress task and must be fast and non-blocking; slow consumers
//!    buffer externally.
//! 2. **Current snapshot**: [`SharedReducer::snapshot`] returns a copy of
//!    the partial assistant message that is safe to read from any task.
//! 3. **Final outcome**: [`reduce_stream`] resolves once a terminal chunk
//!    is observed, the transport errs, or cancellation wins the race.
//!
//! Parts are stored keyed by the adapter-assigned part index; the final
//! message lists them in ascending index order regardless of the order in
//! which deltas arrived.

use crate::chunk::StreamChunk;
use crate::message::{AssistantMessage, AssistantPart, FinishReason, ToolCallPart, Usage};
use crate::provider::ChunkStream;
use crate::{Error, Result};
use futures::{FutureExt, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle status of one streamed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Chunks are still being applied
    Streaming,
    /// A `Complete` chunk was observed
    Succeeded,
    /// An `Error` chunk or transport failure was observed
    Failed,
    /// The turn was cancelled cooperatively
    Cancelled,
}

/// A content part under construction.
#[derive(Debug, Clone)]
enum PartialPart {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        id: Option<String>,
        redacted: bool,
        signature: Option<String>,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        /// `None` until the matching `ToolCallComplete` decodes arguments
        arguments: Option<serde_json::Value>,
    },
}

impl PartialPart {
    fn into_part(self) -> AssistantPart {
        match self {
            PartialPart::Text { text } => AssistantPart::Text { text },
            PartialPart::Thinking {
                text,
                id,
                redacted,
                signature,
            } => AssistantPart::Thinking {
                text,
                id,
                redacted,
                signature,
            },
            PartialPart::ToolCall {
                call_id,
                tool_name,
                arguments,
            } => AssistantPart::ToolCall(ToolCallPart::new(
                call_id,
                tool_name,
                // A pending call surfaces as null in partial snapshots
                arguments.unwrap_or(serde_json::Value::Null),
            )),
        }
    }
}

/// The per-call state machine.
///
/// Pure and synchronous; [`reduce_stream`] drives it from an async chunk
/// stream, and unit tests drive it directly.
#[derive(Debug)]
pub struct StreamReducer {
    id: Option<String>,
    model: Option<String>,
    parts: BTreeMap<u32, PartialPart>,
    finish_reason: Option<FinishReason>,
    usage: Usage,
    status: StreamStatus,
}

impl Default for StreamReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReducer {
    /// Create a reducer with no accumulated state.
    pub fn new() -> Self {
        Self {
            id: None,
            model: None,
            parts: BTreeMap::new(),
            finish_reason: None,
            usage: Usage::default(),
            status: StreamStatus::Streaming,
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> StreamStatus {
        self.status
    }

    /// Usage recorded so far.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Finish reason, once a terminal chunk has been applied.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason.clone()
    }

    /// Apply one chunk.
    ///
    /// After cancellation or a terminal chunk, further chunks are ignored:
    /// the cancel point is a hard cutoff, and trailing frames an adapter
    /// already emitted must not mutate a finished message.
    pub fn apply(&mut self, chunk: &StreamChunk) -> Result<()> {
        if self.status != StreamStatus::Streaming {
            return Ok(());
        }

        match chunk {
            StreamChunk::Start { id, model } => {
                self.id = Some(id.clone());
                self.model = Some(model.clone());
            }
            StreamChunk::TextStart { index } => {
                self.parts.insert(
                    *index,
                    PartialPart::Text {
                        text: String::new(),
                    },
                );
            }
            StreamChunk::TextDelta { index, text } => {
                let slot = self.parts.entry(*index).or_insert(PartialPart::Text {
                    text: String::new(),
                });
                match slot {
                    PartialPart::Text { text: buffer } => buffer.push_str(text),
                    _ => {
                        return Err(Error::stream(format!(
                            "text-delta for part {index} which is not a text part"
                        )));
                    }
                }
            }
            StreamChunk::TextComplete { .. } => {
                // Marker only; the part already holds its full text.
            }
            StreamChunk::ThinkingStart {
                index,
                id,
                redacted,
            } => {
                self.parts.insert(
                    *index,
                    PartialPart::Thinking {
                        text: String::new(),
                        id: id.clone(),
                        redacted: *redacted,
                        signature: None,
                    },
                );
            }
            StreamChunk::ThinkingDelta { index, text } => {
                let slot = self.parts.entry(*index).or_insert(PartialPart::Thinking {
                    text: String::new(),
                    id: None,
                    redacted: false,
                    signature: None,
                });
                match slot {
                    PartialPart::Thinking { text: buffer, .. } => buffer.push_str(text),
                    _ => {
                        return Err(Error::stream(format!(
                            "thinking-delta for part {index} which is not a thinking part"
                        )));
                    }
                }
            }
            StreamChunk::ThinkingComplete { index, signature } => {
                if let Some(PartialPart::Thinking {
                    signature: slot, ..
                }) = self.parts.get_mut(index)
                {
                    *slot = signature.clone();
                }
            }
            StreamChunk::ToolCallStart {
                index,
                call_id,
                tool_name,
            } => {
                self.parts.insert(
                    *index,
                    PartialPart::ToolCall {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                        arguments: None,
                    },
                );
            }
            StreamChunk::ToolCallComplete {
                index,
                call_id,
                tool_name,
                arguments,
            } => {
                if !arguments.is_object() {
                    return Err(Error::stream(format!(
                        "tool '{tool_name}' arguments must decode to a JSON object, got {}",
                        json_kind(arguments)
                    )));
                }
                self.parts.insert(
                    *index,
                    PartialPart::ToolCall {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                        arguments: Some(arguments.clone()),
                    },
                );
            }
            StreamChunk::Complete {
                finish_reason,
                usage,
            } => {
                self.finish_reason = Some(finish_reason.clone());
                self.usage.add(*usage);
                self.status = StreamStatus::Succeeded;
            }
            StreamChunk::Error {
                message,
                usage,
                error_type,
            } => {
                self.finish_reason = Some(FinishReason::Error);
                if let Some(usage) = usage {
                    self.usage.add(*usage);
                }
                self.status = StreamStatus::Failed;
                return Err(Error::provider(format!("{error_type}: {message}")));
            }
        }

        Ok(())
    }

    /// Mark the turn cancelled. Idempotent; a no-op after completion.
    pub fn cancel(&mut self) {
        if self.status == StreamStatus::Streaming {
            self.status = StreamStatus::Cancelled;
            self.finish_reason = Some(FinishReason::Cancelled);
        }
    }

    /// Copy of the message as accumulated so far, parts in ascending index
    /// order. Pending tool-call arguments appear as `null`.
    pub fn snapshot(&self) -> AssistantMessage {
        AssistantMessage {
            id: self
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            model: self.model.clone(),
            content: self
                .parts
                .values()
                .cloned()
                .map(PartialPart::into_part)
                .collect(),
            finish_reason: self.finish_reason.clone(),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Listener invoked for every chunk, in production order.
pub type ChunkListener = Arc<dyn Fn(&StreamChunk) + Send + Sync>;

/// Fanout multiplexer pushing every chunk to each subscriber.
///
/// Subscription order is preserved per subscriber; a subscriber added
/// mid-stream observes only future chunks.
#[derive(Clone, Default)]
pub struct ChunkFanout {
    listeners: Arc<Mutex<Vec<ChunkListener>>>,
}

impl ChunkFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for all future chunks.
    pub fn subscribe(&self, listener: ChunkListener) {
        self.listeners
            .lock()
            .expect("chunk listener registry poisoned")
            .push(listener);
    }

    /// Deliver one chunk to every subscriber, synchronously.
    pub fn emit(&self, chunk: &StreamChunk) {
        let listeners = self
            .listeners
            .lock()
            .expect("chunk listener registry poisoned");
        for listener in listeners.iter() {
            listener(chunk);
        }
    }
}

impl std::fmt::Debug for ChunkFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.listeners.lock().map(|l| l.len()).unwrap_or(0);
        f.debug_struct("ChunkFanout")
            .field("listeners", &count)
            .finish()
    }
}

/// Thread-safe handle over a [`StreamReducer`].
///
/// The drive loop holds it to apply chunks; any other task may call
/// [`snapshot`](SharedReducer::snapshot) or
/// [`cancel`](SharedReducer::cancel) concurrently.
#[derive(Clone, Debug, Default)]
pub struct SharedReducer {
    inner: Arc<Mutex<StreamReducer>>,
}

impl SharedReducer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StreamReducer::new())),
        }
    }

    /// Snapshot of the partial message, safe from any task.
    pub fn snapshot(&self) -> AssistantMessage {
        self.lock().snapshot()
    }

    /// Current status.
    pub fn status(&self) -> StreamStatus {
        self.lock().status()
    }

    /// Usage recorded so far.
    pub fn usage(&self) -> Usage {
        self.lock().usage()
    }

    /// Mark the turn cancelled. Idempotent.
    pub fn cancel(&self) {
        self.lock().cancel();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StreamReducer> {
        self.inner.lock().expect("stream reducer poisoned")
    }
}

/// Outcome of driving one streamed turn to its end.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Terminal status of the turn
    pub status: StreamStatus,
    /// The final message, or the partial accumulated up to cancellation
    pub message: AssistantMessage,
    /// Usage for this turn
    pub usage: Usage,
}

/// Drive a provider chunk stream to completion.
///
/// Every chunk is first fanned out to subscribers, then applied to the
/// reducer. When `cancel` fires, chunks the transport has already buffered
/// are drained without waiting, the reducer is marked cancelled, and the
/// partial message is returned; the token is expected to also abort the
/// underlying connection inside the provider adapter.
///
/// Transport errors and provider error chunks return `Err`; the caller can
/// still read the partial message from `shared`.
pub async fn reduce_stream(
    mut stream: ChunkStream,
    shared: &SharedReducer,
    fanout: &ChunkFanout,
    cancel: &CancellationToken,
) -> Result<TurnOutcome> {
    if cancel.is_cancelled() {
        shared.cancel();
        return Ok(finish(shared));
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Apply whatever the transport already has ready, but do
                // not wait for anything new past the cancel point.
                while let Some(Some(item)) = stream.next().now_or_never() {
                    match item {
                        Ok(chunk) => {
                            fanout.emit(&chunk);
                            shared.lock().apply(&chunk)?;
                        }
                        Err(_) => break,
                    }
                }
                shared.cancel();
                return Ok(finish(shared));
            }
            item = stream.next() => {
                match item {
                    Some(Ok(chunk)) => {
                        fanout.emit(&chunk);
                        let terminal = chunk.is_terminal();
                        shared.lock().apply(&chunk)?;
                        if terminal {
                            return Ok(finish(shared));
                        }
                    }
                    Some(Err(e)) => {
                        let mut reducer = shared.lock();
                        if reducer.status() == StreamStatus::Streaming {
                            reducer.status = StreamStatus::Failed;
                            reducer.finish_reason = Some(FinishReason::Error);
                        }
                        return Err(e);
                    }
                    None => {
                        // Stream ended without a terminal chunk: adapter bug
                        // or a connection dropped mid-generation.
                        let mut reducer = shared.lock();
                        reducer.status = StreamStatus::Failed;
                        reducer.finish_reason = Some(FinishReason::Error);
                        return Err(Error::stream(
                            "stream ended without a terminal chunk",
                        ));
                    }
                }
            }
        }
    }
}

fn finish(shared: &SharedReducer) -> TurnOutcome {
    let reducer = shared.lock();
    TurnOutcome {
        status: reducer.status(),
        message: reducer.snapshot(),
        usage: reducer.usage(),
    }
}
