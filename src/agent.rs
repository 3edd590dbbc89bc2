//! Agent: the tool-calling turn loop.
//!
//! An [`Agent`] binds a provider, a model, a conversation history, a tool
//! registry and a tracing context. [`Agent::send`] appends a user message
//! and then alternates model generation with tool execution until a
//! terminal stop condition:
//!
//! ```text
//! loop:
//!     stream one model turn, reducing chunks into an assistant message
//!     append it to history, accumulate usage
//!     finish reason stop/length/custom  -> done
//!     finish reason function_call       -> execute each tool call in
//!                                          part-index order, append a
//!                                          tool message, go again
//! ```
//!
//! Tool calls within one turn always run sequentially in part-index order;
//! parallelism lives one level up, across graph nodes. A turn that claims
//! `function_call` but carries no tool-call parts is treated as `stop`.
//! Unknown tool names abort the run after recording a structured
//! tool-result so the trace stays intelligible; a tool that merely fails
//! gets its error recorded the same way and the loop continues, giving the
//! model a chance to recover.

use crate::cancellation::CancellationToken;
use crate::message::{
    AssistantMessage, FinishReason, Message, ToolResult, ToolResultBody, Usage,
};
use crate::provider::{GenerateOptions, GenerateRequest, Provider};
use crate::reducer::{
    reduce_stream, ChunkFanout, ChunkListener, SharedReducer, StreamStatus, TurnOutcome,
};
use crate::tools::{Tool, ToolOutput, ToolRegistry};
use crate::trace::{Span, SpanResult, SpanStatus, Tracer};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// How an agent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// The model reached a terminal finish reason
    Succeeded,
    /// The run was cancelled; the message is the partial accumulated so far
    Cancelled,
}

/// Result of one [`Agent::send`] call.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Terminal status
    pub status: AgentStatus,
    /// The final assistant message (partial when cancelled)
    pub message: AssistantMessage,
    /// Every message appended to history during this run, in order
    pub new_messages: Vec<Message>,
    /// Cumulative usage across all turns of this run
    pub usage: Usage,
}

/// A stateful conversation bound to one provider and toolset.
pub struct Agent {
    provider: Arc<dyn Provider>,
    model: String,
    system: Option<String>,
    history: Vec<Message>,
    tools: ToolRegistry,
    options: GenerateOptions,
    max_iterations: Option<u32>,
    streaming: bool,
    fanout: ChunkFanout,
    tracer: Tracer,
    parent_span: Option<Span>,
    cancel: CancellationToken,
    /// Partial message salvaged from a failed turn, appended to history by
    /// the loop before the error propagates
    last_partial: Option<AssistantMessage>,
}

impl Agent {
    /// Start building an agent for the given provider and model.
    pub fn builder(provider: Arc<dyn Provider>, model: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            provider,
            model: model.into(),
            system: None,
            tools: ToolRegistry::new(),
            options: GenerateOptions::default(),
            max_iterations: None,
            streaming: true,
            listeners: Vec::new(),
            tracer: Tracer::disabled(),
            parent_span: None,
            cancel: None,
        }
    }

    /// The conversation so far.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Mutable access to the conversation, for seeding or pruning.
    pub fn history_mut(&mut self) -> &mut Vec<Message> {
        &mut self.history
    }

    /// Drop the conversation history.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// The cancellation token governing this agent's runs.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Register a listener for every stream chunk of future runs.
    pub fn on_chunk(&self, listener: ChunkListener) {
        self.fanout.subscribe(listener);
    }

    /// Append a plain-text user message and run the loop to completion.
    pub async fn send(&mut self, prompt: impl Into<String>) -> Result<AgentOutcome> {
        self.send_message(Message::user(prompt)).await
    }

    /// Append an arbitrary message and run the loop to completion.
    pub async fn send_message(&mut self, message: Message) -> Result<AgentOutcome> {
        self.history.push(message.clone());
        let mut new_messages = vec![message];
        let mut usage = Usage::default();

        let span = match &self.parent_span {
            Some(parent) => parent.child("agent"),
            None => self.tracer.root_span("agent"),
        };

        let result = self.run_loop(&span, &mut new_messages, &mut usage).await;
        match &result {
            Ok(outcome) => span.end(match outcome.status {
                AgentStatus::Succeeded => SpanStatus::Ok,
                AgentStatus::Cancelled => SpanStatus::Cancelled,
            }),
            Err(_) => span.end(SpanStatus::Error),
        }
        result
    }

    async fn run_loop(
        &mut self,
        span: &Span,
        new_messages: &mut Vec<Message>,
        usage: &mut Usage,
    ) -> Result<AgentOutcome> {
        let mut iteration: u32 = 0;

        loop {
            iteration += 1;
            if let Some(limit) = self.max_iterations {
                if iteration > limit {
                    return Err(Error::MaxIterations { limit });
                }
            }
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled_outcome(None, new_messages, *usage));
            }

            let turn_span = span.child("turn");
            let turn = match self.run_turn().await {
                Ok(turn) => turn,
                Err(e) => {
                    // The partial message still lands in history so the
                    // trace shows what the model produced before failing.
                    if let Some(partial) = self.last_partial.take() {
                        let message = Message::Assistant(partial);
                        self.history.push(message.clone());
                        new_messages.push(message);
                    }
                    turn_span.end(SpanStatus::Error);
                    return Err(e);
                }
            };

            let message = turn.message.clone();
            self.history.push(Message::Assistant(message.clone()));
            new_messages.push(Message::Assistant(message.clone()));
            usage.add(turn.usage);

            turn_span.end_with(
                match turn.status {
                    StreamStatus::Cancelled => SpanStatus::Cancelled,
                    _ => SpanStatus::Ok,
                },
                SpanResult::Llm {
                    model: self.model.clone(),
                    finish_reason: message.finish_reason.clone(),
                    usage: turn.usage,
                },
            );

            if turn.status == StreamStatus::Cancelled {
                return Ok(self.cancelled_outcome(Some(message), new_messages, *usage));
            }

            match message.finish_reason {
                Some(FinishReason::FunctionCall) => {}
                _ => {
                    return Ok(AgentOutcome {
                        status: AgentStatus::Succeeded,
                        message,
                        new_messages: std::mem::take(new_messages),
                        usage: *usage,
                    });
                }
            }

            let calls: Vec<_> = message.tool_calls().into_iter().cloned().collect();
            if calls.is_empty() {
                // A function_call finish with nothing to call is a stop.
                return Ok(AgentOutcome {
                    status: AgentStatus::Succeeded,
                    message,
                    new_messages: std::mem::take(new_messages),
                    usage: *usage,
                });
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                let tool_span = span.child("tool");
                let tool = match self.tools.get(&call.name) {
                    Some(tool) => Arc::clone(tool),
                    None => {
                        warn!(tool = %call.name, "model requested unregistered tool");
                        results.push(ToolResult::error(
                            &call.id,
                            &call.name,
                            format!("tool '{}' is not available", call.name),
                        ));
                        let message = Message::tool_results(results);
                        self.history.push(message.clone());
                        new_messages.push(message);
                        tool_span.end_with(
                            SpanStatus::Error,
                            SpanResult::Tool {
                                tool_name: call.name.clone(),
                                ok: false,
                            },
                        );
                        return Err(Error::tool_not_found(&call.name));
                    }
                };

                debug!(tool = %call.name, call_id = %call.id, "executing tool");
                let (result, ok) = match tool
                    .execute(call.arguments.clone(), self.cancel.child_token())
                    .await
                {
                    Ok(ToolOutput::Text(text)) => {
                        (ToolResult::text(&call.id, &call.name, text), true)
                    }
                    Ok(ToolOutput::Parts(parts)) => (
                        ToolResult {
                            call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            body: ToolResultBody::Parts(parts),
                        },
                        true,
                    ),
                    Err(e) => {
                        // Recorded for the model; the loop continues.
                        warn!(tool = %call.name, error = %e, "tool execution failed");
                        (ToolResult::error(&call.id, &call.name, e.to_string()), false)
                    }
                };
                tool_span.end_with(
                    if ok { SpanStatus::Ok } else { SpanStatus::Error },
                    SpanResult::Tool {
                        tool_name: call.name.clone(),
                        ok,
                    },
                );
                results.push(result);
            }

            let message = Message::tool_results(results);
            self.history.push(message.clone());
            new_messages.push(message);
        }
    }

    /// Run a single model turn, streamed or not.
    async fn run_turn(&mut self) -> Result<TurnOutcome> {
        let request = self.build_request();

        if !self.streaming {
            let response = self
                .provider
                .generate(&self.model, request)
                .await?;
            return Ok(TurnOutcome {
                status: StreamStatus::Succeeded,
                usage: response.usage,
                message: AssistantMessage {
                    id: response.id,
                    model: Some(response.model),
                    content: response.content,
                    finish_reason: Some(response.finish_reason),
                },
            });
        }

        let shared = SharedReducer::new();
        self.last_partial = None;
        let stream = self
            .provider
            .stream(&self.model, request, self.cancel.child_token())
            .await?;

        match reduce_stream(stream, &shared, &self.fanout, &self.cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let partial = shared.snapshot();
                if !partial.content.is_empty() {
                    self.last_partial = Some(partial);
                }
                Err(e)
            }
        }
    }

    fn build_request(&self) -> GenerateRequest {
        GenerateRequest {
            messages: self.history.clone(),
            system: self.system.clone(),
            tools: self.tools.specs(),
            options: self.options.clone(),
        }
    }

    fn cancelled_outcome(
        &self,
        message: Option<AssistantMessage>,
        new_messages: &mut Vec<Message>,
        usage: Usage,
    ) -> AgentOutcome {
        AgentOutcome {
            status: AgentStatus::Cancelled,
            message: message.unwrap_or_else(|| AssistantMessage {
                id: uuid::Uuid::new_v4().to_string(),
                model: Some(self.model.clone()),
                content: Vec::new(),
                finish_reason: Some(FinishReason::Cancelled),
            }),
            new_messages: std::mem::take(new_messages),
            usage,
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("history", &self.history.len())
            .field("tools", &self.tools.len())
            .field("max_iterations", &self.max_iterations)
            .field("streaming", &self.streaming)
            .finish()
    }
}

/// Builder for [`Agent`] configuration.
pub struct AgentBuilder {
    provider: Arc<dyn Provider>,
    model: String,
    system: Option<String>,
    tools: ToolRegistry,
    options: GenerateOptions,
    max_iterations: Option<u32>,
    streaming: bool,
    listeners: Vec<ChunkListener>,
    tracer: Tracer,
    parent_span: Option<Span>,
    cancel: Option<CancellationToken>,
}

impl AgentBuilder {
    /// Set the system prompt.
    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.system = Some(prompt.into());
        self
    }

    /// Register one tool.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    /// Use an existing registry (replacing tools added so far).
    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.tools = registry;
        self
    }

    /// Set sampling options forwarded to the provider.
    pub fn options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    /// Cap the number of turn-loop iterations. Unset means unbounded.
    pub fn max_iterations(mut self, limit: u32) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    /// Use the provider's non-streaming `generate` instead of `stream`.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Register a listener for every stream chunk.
    pub fn on_chunk(mut self, listener: ChunkListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Attach a tracer for span emission.
    pub fn tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Parent all of this agent's spans under an existing span.
    pub fn parent_span(mut self, span: Span) -> Self {
        self.parent_span = Some(span);
        self
    }

    /// Chain cancellation from the given token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate and build the agent.
    pub fn build(self) -> Result<Agent> {
        if self.model.trim().is_empty() {
            return Err(Error::config("model cannot be empty or whitespace"));
        }

        let fanout = ChunkFanout::new();
        for listener in self.listeners {
            fanout.subscribe(listener);
        }

        Ok(Agent {
            provider: self.provider,
            model: self.model,
            system: self.system,
            history: Vec::new(),
            tools: self.tools,
            options: self.options,
            max_iterations: self.max_iterations,
            streaming: self.streaming,
            fanout,
            tracer: self.tracer,
            parent_span: self.parent_span,
            cancel: self.cancel.unwrap_or_default(),
            last_partial: None,
        })
    }
}
