//! # axle
//!
//! A library for orchestrating multi-step LLM interactions.
//!
//! You describe work as declarative [`Instruction`]s (a prompt template,
//! an optional typed output schema, optional tools and file attachments)
//! and compose them into a linear pipeline or a directed acyclic graph of
//! named nodes. The runtime validates and layers the graph, executes each
//! stage with bounded concurrency, drives every node through a
//! tool-calling agent loop against a pluggable provider backend, streams
//! deltas to observers while folding them into a coherent assistant
//! message, parses the terminal text against the declared schema, and
//! threads each node's typed result into downstream prompts through
//! `{{variable}}` interpolation.
//!
//! ## A two-node graph
//!
//! ```rust,no_run
//! use axle::{
//!     FieldKind, GraphDefinition, GraphRunner, Instruction, NodeSpec,
//!     OutputSchema, OpenAiProvider, VarMap,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> axle::Result<()> {
//!     let provider = Arc::new(OpenAiProvider::new(
//!         "http://localhost:1234/v1",
//!         "not-needed",
//!     )?);
//!
//!     let graph = GraphDefinition::new()
//!         .node(
//!             "outline",
//!             Instruction::new("Outline an article about {{topic}}.")
//!                 .with_schema(OutputSchema::new().field("outline", FieldKind::String)),
//!         )
//!         .node(
//!             "draft",
//!             NodeSpec::new(Instruction::new("Write the article.\n\n{{outline}}"))
//!                 .depends_on(["outline"]),
//!         );
//!
//!     let runner = GraphRunner::builder(provider, "qwen2.5-32b-instruct").build()?;
//!
//!     let mut seed = VarMap::new();
//!     seed.insert("topic".into(), "streams".into());
//!     let outcome = runner.run(&graph, seed).await;
//!     println!("{:#?}", outcome.response);
//!     Ok(())
//! }
//! ```
//!
//! ## A single agent with tools
//!
//! ```rust,no_run
//! use axle::{tool, Agent, OpenAiProvider, ToolOutput};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> axle::Result<()> {
//!     let provider = Arc::new(OpenAiProvider::new(
//!         "http://localhost:1234/v1",
//!         "not-needed",
//!     )?);
//!
//!     let add = tool("add", "Add two numbers")
//!         .param("a", "number")
//!         .param("b", "number")
//!         .build(|args| async move {
//!             let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
//!             Ok(ToolOutput::text(sum.to_string()))
//!         });
//!
//!     let mut agent = Agent::builder(provider, "qwen2.5-32b-instruct")
//!         .system("You are a careful calculator")
//!         .tool(Arc::new(add))
//!         .max_iterations(5)
//!         .build()?;
//!
//!     let outcome = agent.send("What is 2 + 3?").await?;
//!     println!("{}", outcome.message.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **message**: the canonical conversation model, ordered content parts
//!   (text, thinking, tool-call, file) under user/assistant/tool roles
//! - **chunk**: the provider-neutral streaming alphabet
//! - **provider**: the backend contract (`generate` + `stream`)
//! - **providers**: three conformant wire adapters (chat-completions,
//!   responses/events, native multipart)
//! - **reducer**: folds chunk streams into assistant messages, with
//!   snapshots, subscriber fanout and cooperative cancellation
//! - **tools**: the tool contract, closure builder and registry
//! - **agent**: the tool-calling turn loop
//! - **instruction / template / schema / parser**: prompt compilation,
//!   `{{var}}` interpolation and tagged-output parsing
//! - **step / graph**: node steps, DAG validation, stage layering and
//!   bounded-concurrency execution
//! - **trace**: hierarchical spans with typed results behind a writer
//!   contract
//! - **cancellation**: one token chained from the top-level call down to
//!   transports and tools
//! - **batch**: the append-only idempotency ledger for batch runs

mod agent;
mod batch;
mod cancellation;
mod chunk;
mod error;
mod graph;
mod instruction;
mod message;
mod parser;
mod provider;
pub mod providers;
mod reducer;
mod schema;
mod step;
mod template;
mod tools;
mod trace;

pub use agent::{Agent, AgentBuilder, AgentOutcome, AgentStatus};
pub use batch::{task_file_hash, BatchLedger, LedgerEntry};
pub use cancellation::{cancel_after, deadline_token, CancellationToken};
pub use chunk::StreamChunk;
pub use error::{Error, Result};
pub use graph::{
    ExecutionPlan, GraphDefinition, GraphNode, GraphOutcome, GraphRunner, GraphRunnerBuilder,
    NodeSpec,
};
pub use instruction::Instruction;
pub use message::{
    AssistantMessage, AssistantPart, FileCategory, FilePart, FinishReason, Message, ToolCallPart,
    ToolResult, ToolResultBody, ToolResultPart, Usage, UserContent, UserPart,
};
pub use parser::parse_response;
pub use provider::{ChunkStream, GenerateOptions, GenerateRequest, ModelResponse, Provider};
pub use providers::{AnthropicProvider, OpenAiProvider, ResponsesProvider};
pub use reducer::{
    reduce_stream, ChunkFanout, ChunkListener, SharedReducer, StreamReducer, StreamStatus,
    TurnOutcome,
};
pub use schema::{FieldKind, OutputSchema};
pub use step::{Action, Step, WriteToDisk};
pub use template::{render, VarMap};
pub use tools::{
    normalize_schema, tool, FnTool, Tool, ToolBuilder, ToolHandler, ToolOutput, ToolRegistry,
    ToolSpec,
};
pub use trace::{
    NullWriter, Span, SpanRecord, SpanResult, SpanStatus, TraceEvent, TraceWriter, Tracer,
};
