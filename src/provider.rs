//! Provider contract: the abstract interface every LLM backend implements.
//!
//! The core never talks to a wire format directly. It hands a
//! [`GenerateRequest`] to a [`Provider`] and consumes either a finished
//! [`ModelResponse`] (`generate`) or a stream of canonical
//! [`StreamChunk`](crate::chunk::StreamChunk)s (`stream`). The concrete
//! adapters under [`crate::providers`] are conformant implementations;
//! callers may plug in their own.

use crate::chunk::StreamChunk;
use crate::message::{AssistantPart, FinishReason, Message, Usage};
use crate::tools::ToolSpec;
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Stream of canonical chunks from a provider adapter.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Sampling and length options forwarded to the backend.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Stop sequences
    pub stop: Vec<String>,
}

/// One model invocation: conversation, optional system prompt, tool
/// definitions and sampling options.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// The conversation so far
    pub messages: Vec<Message>,
    /// System prompt, prepended by the adapter in its native shape
    pub system: Option<String>,
    /// Tool definitions offered to the model
    pub tools: Vec<ToolSpec>,
    /// Sampling options
    pub options: GenerateOptions,
}

/// A finished, non-streamed model response.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Provider-assigned message id
    pub id: String,
    /// Model that produced the response
    pub model: String,
    /// Ordered content parts
    pub content: Vec<AssistantPart>,
    /// Terminal classification
    pub finish_reason: FinishReason,
    /// Token usage
    pub usage: Usage,
    /// Raw provider payload, for diagnostics
    pub raw: Option<serde_json::Value>,
}

/// Abstract contract for LLM backends.
///
/// Implementations must be cheap to share (`Send + Sync`); the agent holds
/// one behind an `Arc` and may issue calls from concurrent graph nodes.
///
/// Providers without native streaming may implement `stream` by calling
/// `generate` and emitting a single `TextDelta` covering the whole body.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name used in traces and error messages.
    fn name(&self) -> &str;

    /// Run one non-streaming generation.
    async fn generate(&self, model: &str, request: GenerateRequest) -> Result<ModelResponse>;

    /// Open a streaming generation.
    ///
    /// The returned stream yields chunks in the canonical alphabet. The
    /// `cancel` token must be wired into the underlying transport so that
    /// cancellation aborts the connection rather than merely abandoning it.
    async fn stream(
        &self,
        model: &str,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream>;
}
