//! Tracing contract: hierarchical spans with typed results.
//!
//! Spans form a tree rooted at the top-level call (graph run → node →
//! turn → tool). Ending a span is idempotent, and events attached to an
//! in-flight span reach writers immediately; the tracer never buffers.
//! Writers implement [`TraceWriter`]; the tracer with no writers is a
//! no-op, which is what the core defaults to.
//!
//! This is the only cross-cutting concern the core depends on. Ambient
//! logging goes through the `tracing` crate separately; this module is the
//! structured, caller-consumable record of a run.

use crate::message::{FinishReason, Usage};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Typed result attached when a span ends.
#[derive(Debug, Clone)]
pub enum SpanResult {
    /// A model turn
    Llm {
        model: String,
        finish_reason: Option<FinishReason>,
        usage: Usage,
    },
    /// A tool execution
    Tool { tool_name: String, ok: bool },
    /// No structured result
    None,
}

/// Terminal status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Running,
    Ok,
    Error,
    Cancelled,
}

/// Snapshot of a span handed to writers.
#[derive(Debug, Clone)]
pub struct SpanRecord {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    pub result: SpanResult,
}

/// A timestamped event attached to an in-flight span.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub span_id: String,
    pub name: String,
    pub at: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Sink for span lifecycles and events.
///
/// Writers are called synchronously from the traced task; implementations
/// must be fast and non-blocking.
pub trait TraceWriter: Send + Sync {
    fn span_started(&self, span: &SpanRecord);
    fn event(&self, event: &TraceEvent);
    fn span_ended(&self, span: &SpanRecord);
}

/// Writer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullWriter;

impl TraceWriter for NullWriter {
    fn span_started(&self, _span: &SpanRecord) {}
    fn event(&self, _event: &TraceEvent) {}
    fn span_ended(&self, _span: &SpanRecord) {}
}

/// Entry point for creating span trees.
#[derive(Clone, Default)]
pub struct Tracer {
    writers: Arc<Vec<Arc<dyn TraceWriter>>>,
}

impl Tracer {
    /// A tracer with no writers; all spans become no-ops.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A tracer delivering to the given writers.
    pub fn new(writers: Vec<Arc<dyn TraceWriter>>) -> Self {
        Self {
            writers: Arc::new(writers),
        }
    }

    /// Open a root span.
    pub fn root_span(&self, name: impl Into<String>) -> Span {
        self.open(name.into(), None)
    }

    fn open(&self, name: String, parent_id: Option<String>) -> Span {
        let record = SpanRecord {
            id: Uuid::new_v4().to_string(),
            parent_id,
            name,
            started_at: Utc::now(),
            ended_at: None,
            status: SpanStatus::Running,
            result: SpanResult::None,
        };
        for writer in self.writers.iter() {
            writer.span_started(&record);
        }
        Span {
            tracer: self.clone(),
            state: Arc::new(Mutex::new(record)),
        }
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("writers", &self.writers.len())
            .finish()
    }
}

/// One node of the span tree.
#[derive(Clone, Debug)]
pub struct Span {
    tracer: Tracer,
    state: Arc<Mutex<SpanRecord>>,
}

impl Span {
    /// Open a child span.
    pub fn child(&self, name: impl Into<String>) -> Span {
        let parent_id = self.lock().id.clone();
        self.tracer.open(name.into(), Some(parent_id))
    }

    /// Attach an event; delivered to writers immediately.
    pub fn event(&self, name: impl Into<String>, data: serde_json::Value) {
        let event = TraceEvent {
            span_id: self.lock().id.clone(),
            name: name.into(),
            at: Utc::now(),
            data,
        };
        for writer in self.tracer.writers.iter() {
            writer.event(&event);
        }
    }

    /// End the span with a status. Idempotent: only the first call takes
    /// effect and reaches writers.
    pub fn end(&self, status: SpanStatus) {
        self.end_with(status, SpanResult::None)
    }

    /// End the span with a status and a typed result. Idempotent.
    pub fn end_with(&self, status: SpanStatus, result: SpanResult) {
        let record = {
            let mut state = self.lock();
            if state.ended_at.is_some() {
                return;
            }
            state.ended_at = Some(Utc::now());
            state.status = status;
            if !matches!(result, SpanResult::None) {
                state.result = result;
            }
            state.clone()
        };
        for writer in self.tracer.writers.iter() {
            writer.span_ended(&record);
        }
    }

    /// Snapshot of the span record.
    pub fn record(&self) -> SpanRecord {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpanRecord> {
        self.state.lock().expect("span state poisoned")
    }
}
