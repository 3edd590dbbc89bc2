//! Concrete provider adapters.
//!
//! Three wire families, one contract: each adapter translates its native
//! streaming shape into the canonical chunk alphabet of
//! [`crate::chunk::StreamChunk`].
//!
//! - [`openai`]: chat-completions deltas (also spoken by most local
//!   inference servers).
//! - [`responses`]: the responses/events API with typed output items.
//! - [`anthropic`]: native multipart content blocks with thinking
//!   support.
//!
//! Each adapter keeps its translation state machine separate from the
//! HTTP plumbing so the chunk mapping is testable without a server.

pub mod anthropic;
pub mod openai;
pub mod responses;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use responses::ResponsesProvider;
