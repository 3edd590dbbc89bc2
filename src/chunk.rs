//! The canonical streaming chunk alphabet.
//!
//! Every provider adapter translates its native wire events into this one
//! vocabulary; the [`StreamReducer`](crate::reducer::StreamReducer) and all
//! chunk subscribers consume it without knowing which provider produced it.
//!
//! `index` is a monotonic part index assigned by the adapter. It defines
//! insertion order into the assistant message and never repeats within a
//! stream. When the active part class changes (text to thinking, or a tool
//! call appears) the adapter emits the outgoing part's `*Complete` before
//! the new part's `*Start`, so observers always see well-nested part
//! lifecycles.

use crate::message::{FinishReason, Usage};
use serde::{Deserialize, Serialize};

/// One element of the provider-neutral streaming alphabet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamChunk {
    /// Stream opened: message id and producing model are known.
    Start {
        /// Provider-assigned message id
        id: String,
        /// Model identifier
        model: String,
    },

    /// A text part begins at `index`.
    TextStart {
        /// Part index
        index: u32,
    },
    /// Incremental text for the part at `index`.
    TextDelta {
        /// Part index
        index: u32,
        /// The text fragment
        text: String,
    },
    /// The text part at `index` is complete (marker only).
    TextComplete {
        /// Part index
        index: u32,
    },

    /// A thinking part begins at `index`.
    ThinkingStart {
        /// Part index
        index: u32,
        /// Provider-assigned id for the reasoning block
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// True when the provider withholds the reasoning content
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        redacted: bool,
    },
    /// Incremental reasoning text for the part at `index`.
    ThinkingDelta {
        /// Part index
        index: u32,
        /// The reasoning fragment
        text: String,
    },
    /// The thinking part at `index` is complete.
    ThinkingComplete {
        /// Part index
        index: u32,
        /// Provider signature to echo back with the part, when required
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// A tool call begins at `index`. Arguments are still streaming and are
    /// not available until the matching [`StreamChunk::ToolCallComplete`].
    ToolCallStart {
        /// Part index
        index: u32,
        /// Call id, unique within the conversation
        call_id: String,
        /// Tool name
        tool_name: String,
    },
    /// The tool call at `index` is complete and its arguments decoded.
    ToolCallComplete {
        /// Part index
        index: u32,
        /// Call id
        call_id: String,
        /// Tool name
        tool_name: String,
        /// Decoded argument object
        arguments: serde_json::Value,
    },

    /// The turn finished.
    Complete {
        /// Terminal classification
        finish_reason: FinishReason,
        /// Token usage for this turn
        usage: Usage,
    },
    /// The provider reported an error; the turn is over.
    Error {
        /// Stable machine-readable error class from the adapter
        error_type: String,
        /// Human-readable message
        message: String,
        /// Usage, when the provider reported it alongside the error
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamChunk {
    /// The part index this chunk addresses, if any.
    pub fn index(&self) -> Option<u32> {
        match self {
            StreamChunk::TextStart { index }
            | StreamChunk::TextDelta { index, .. }
            | StreamChunk::TextComplete { index }
            | StreamChunk::ThinkingStart { index, .. }
            | StreamChunk::ThinkingDelta { index, .. }
            | StreamChunk::ThinkingComplete { index, .. }
            | StreamChunk::ToolCallStart { index, .. }
            | StreamChunk::ToolCallComplete { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// True for `Complete` and `Error`, the two terminal chunks.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Complete { .. } | StreamChunk::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_serializes_kebab_case_tag() {
        let chunk = StreamChunk::TextDelta {
            index: 0,
            text: "hi".to_string(),
        };
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["type"], "text-delta");
        assert_eq!(value["index"], 0);
        assert_eq!(value["text"], "hi");
    }

    #[test]
    fn test_terminal_chunks() {
        let complete = StreamChunk::Complete {
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        };
        let error = StreamChunk::Error {
            error_type: "overloaded".to_string(),
            message: "try later".to_string(),
            usage: None,
        };
        let delta = StreamChunk::TextDelta {
            index: 0,
            text: String::new(),
        };
        assert!(complete.is_terminal());
        assert!(error.is_terminal());
        assert!(!delta.is_terminal());
    }

    #[test]
    fn test_index_accessor() {
        let chunk = StreamChunk::ToolCallStart {
            index: 3,
            call_id: "c1".to_string(),
            tool_name: "calc".to_string(),
        };
        assert_eq!(chunk.index(), Some(3));
        assert_eq!(
            StreamChunk::Start {
                id: "m".to_string(),
                model: "x".to_string()
            }
            .index(),
            None
        );
    }
}
