//! Conversation model: messages, content parts, tool results.
//!
//! A conversation is an ordered list of [`Message`]s with three roles:
//!
//! - **User**: plain text or an ordered list of parts (text, file
//!   reference).
//! - **Assistant**: an ordered list of parts drawn from text, thinking and
//!   tool-call. Carries an id, the producing model and a finish reason.
//! - **Tool**: a batch of [`ToolResult`]s answering the tool calls of the
//!   preceding assistant message.
//!
//! Part order is insertion-significant: thinking parts may precede,
//! interleave with, or follow text parts, and the order must survive a
//! round-trip through any provider adapter (some providers require thinking
//! parts echoed back verbatim).
//!
//! # Invariants
//!
//! - An assistant message containing tool-call parts has
//!   `finish_reason = FinishReason::FunctionCall`; tool calls are always the
//!   terminal parts of their turn.
//! - Each tool-call id is unique within a conversation; a [`ToolResult`]
//!   references it by exact id.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Terminal classification of a model turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural completion
    Stop,
    /// Hit the max-token limit
    Length,
    /// The model requested one or more tool calls
    FunctionCall,
    /// The provider reported an error mid-generation
    Error,
    /// The turn was cancelled cooperatively
    Cancelled,
    /// Provider-specific reason passed through verbatim
    Custom(String),
}

/// Token usage for one turn or an accumulated run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt-side tokens
    #[serde(rename = "in")]
    pub input_tokens: u64,
    /// Generated tokens
    #[serde(rename = "out")]
    pub output_tokens: u64,
}

impl Usage {
    /// Fold another usage record into this one.
    pub fn add(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Category of an attached file, used by provider adapters to pick the
/// right wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Image,
    Document,
    Text,
}

/// A file attached to a user message.
///
/// The payload is carried base64-encoded so the part serializes cleanly;
/// [`FilePart::from_bytes`] encodes on construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePart {
    /// Original path or display name of the file
    pub path: String,
    /// MIME type, e.g. `image/png` or `application/pdf`
    pub mime_type: String,
    /// Base64-encoded file contents
    pub data: String,
    /// Broad category driving the wire representation
    pub category: FileCategory,
}

impl FilePart {
    /// Build a file part from raw bytes, encoding them as base64.
    pub fn from_bytes(
        path: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: &[u8],
        category: FileCategory,
    ) -> Result<Self> {
        use base64::Engine;

        let mime_type = mime_type.into();
        if mime_type.is_empty() {
            return Err(Error::invalid_input("MIME type cannot be empty"));
        }

        Ok(Self {
            path: path.into(),
            mime_type,
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            category,
        })
    }
}

/// One element of a user message's part list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserPart {
    /// Plain text
    Text {
        /// The text content
        text: String,
    },
    /// File reference
    File(FilePart),
}

/// Content of a user message: a bare string or an ordered part list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    /// Plain string prompt
    Text(String),
    /// Multi-part content (text and file references)
    Parts(Vec<UserPart>),
}

impl UserContent {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        match self {
            UserContent::Text(s) => s.clone(),
            UserContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    UserPart::Text { text } => Some(text.as_str()),
                    UserPart::File(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One element of an assistant message's ordered content list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantPart {
    /// Visible text
    Text {
        /// The text content
        text: String,
    },
    /// Internal reasoning emitted by models that expose it
    Thinking {
        /// The reasoning text (may be empty when redacted)
        text: String,
        /// Provider-assigned id, when one exists
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// True when the provider withheld the reasoning content
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        redacted: bool,
        /// Provider signature required when echoing the part back
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// A request from the model to execute a tool
    ToolCall(ToolCallPart),
}

impl AssistantPart {
    /// Convenience constructor for a text part.
    pub fn text(text: impl Into<String>) -> Self {
        AssistantPart::Text { text: text.into() }
    }

    /// Convenience constructor for a thinking part.
    pub fn thinking(text: impl Into<String>) -> Self {
        AssistantPart::Thinking {
            text: text.into(),
            id: None,
            redacted: false,
            signature: None,
        }
    }
}

/// Tool-call part of an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPart {
    /// Unique identifier for this call, referenced by the matching
    /// [`ToolResult`]
    pub id: String,
    /// Name of the tool to execute
    pub name: String,
    /// Decoded argument object
    pub arguments: serde_json::Value,
    /// Opaque provider extras carried through round-trips
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<serde_json::Value>,
}

impl ToolCallPart {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            provider_metadata: None,
        }
    }
}

/// A complete assistant message assembled from stream chunks or returned by
/// a non-streaming `generate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Provider-assigned message id (or a generated one)
    pub id: String,
    /// Model that produced the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Ordered content parts
    pub content: Vec<AssistantPart>,
    /// Terminal classification, `None` while still streaming
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl AssistantMessage {
    /// Concatenated text of all text parts, in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                AssistantPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool-call parts, in part order.
    pub fn tool_calls(&self) -> Vec<&ToolCallPart> {
        self.content
            .iter()
            .filter_map(|p| match p {
                AssistantPart::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }
}

/// One element of a mixed tool-result body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultPart {
    /// Text fragment
    Text {
        /// The text content
        text: String,
    },
    /// Inline image produced by the tool
    Image {
        /// Base64-encoded image bytes
        data: String,
        /// MIME type of the image
        mime_type: String,
    },
}

/// Body of a tool result: a plain string or an ordered mixed list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultBody {
    Text(String),
    Parts(Vec<ToolResultPart>),
}

/// The outcome of one tool execution, keyed back to its call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the [`ToolCallPart`] this result answers
    pub call_id: String,
    /// Name of the tool that ran
    pub tool_name: String,
    /// Result body
    pub body: ToolResultBody,
}

impl ToolResult {
    /// Build a plain-text result.
    pub fn text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            body: ToolResultBody::Text(body.into()),
        }
    }

    /// Build a structured error result so the model can see what went
    /// wrong and potentially recover.
    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let tool_name = tool_name.into();
        let body = serde_json::json!({
            "error": message.into(),
            "tool": tool_name,
        });
        Self {
            call_id: call_id.into(),
            tool_name,
            body: ToolResultBody::Text(body.to_string()),
        }
    }
}

/// A complete message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Input from the caller
    User {
        /// Plain string or part list
        content: UserContent,
    },
    /// Response from the model
    Assistant(AssistantMessage),
    /// Results of tool executions requested by the preceding assistant turn
    Tool {
        /// One result per tool call, in call order
        results: Vec<ToolResult>,
    },
}

impl Message {
    /// Create a user message from plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            content: UserContent::Text(text.into()),
        }
    }

    /// Create a user message from a part list.
    pub fn user_with_parts(parts: Vec<UserPart>) -> Self {
        Message::User {
            content: UserContent::Parts(parts),
        }
    }

    /// Create a tool message carrying a batch of results.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Message::Tool { results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_text_concatenation_preserves_order() {
        let msg = AssistantMessage {
            id: "m1".to_string(),
            model: Some("test-model".to_string()),
            content: vec![
                AssistantPart::thinking("let me see"),
                AssistantPart::text("Hello"),
                AssistantPart::text(" world"),
            ],
            finish_reason: Some(FinishReason::Stop),
        };
        assert_eq!(msg.text(), "Hello world");
    }

    #[test]
    fn test_tool_calls_extracted_in_part_order() {
        let msg = AssistantMessage {
            id: "m1".to_string(),
            model: None,
            content: vec![
                AssistantPart::text("Using tools"),
                AssistantPart::ToolCall(ToolCallPart::new("c1", "alpha", json!({"x": 1}))),
                AssistantPart::ToolCall(ToolCallPart::new("c2", "beta", json!({"y": 2}))),
            ],
            finish_reason: Some(FinishReason::FunctionCall),
        };
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "alpha");
        assert_eq!(calls[1].name, "beta");
    }

    #[test]
    fn test_message_round_trip_keeps_part_order() {
        let msg = Message::Assistant(AssistantMessage {
            id: "m1".to_string(),
            model: None,
            content: vec![
                AssistantPart::thinking("first"),
                AssistantPart::text("second"),
                AssistantPart::thinking("third"),
            ],
            finish_reason: Some(FinishReason::Stop),
        });

        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        let Message::Assistant(decoded) = decoded else {
            panic!("expected assistant message");
        };
        assert!(matches!(
            decoded.content[0],
            AssistantPart::Thinking { ref text, .. } if text == "first"
        ));
        assert!(matches!(
            decoded.content[1],
            AssistantPart::Text { ref text } if text == "second"
        ));
        assert!(matches!(
            decoded.content[2],
            AssistantPart::Thinking { ref text, .. } if text == "third"
        ));
    }

    #[test]
    fn test_user_content_text_joins_parts() {
        let content = UserContent::Parts(vec![
            UserPart::Text {
                text: "look at this".to_string(),
            },
            UserPart::File(
                FilePart::from_bytes("a.png", "image/png", b"\x89PNG", FileCategory::Image)
                    .unwrap(),
            ),
            UserPart::Text {
                text: "what is it?".to_string(),
            },
        ]);
        assert_eq!(content.text(), "look at this\nwhat is it?");
    }

    #[test]
    fn test_file_part_rejects_empty_mime() {
        assert!(FilePart::from_bytes("x", "", b"data", FileCategory::Text).is_err());
    }

    #[test]
    fn test_tool_result_error_body_is_structured() {
        let result = ToolResult::error("c1", "calc", "division by zero");
        let ToolResultBody::Text(body) = &result.body else {
            panic!("expected text body");
        };
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(value["error"], "division by zero");
        assert_eq!(value["tool"], "calc");
    }

    #[test]
    fn test_usage_add_saturates() {
        let mut usage = Usage {
            input_tokens: u64::MAX,
            output_tokens: 10,
        };
        usage.add(Usage {
            input_tokens: 5,
            output_tokens: 7,
        });
        assert_eq!(usage.input_tokens, u64::MAX);
        assert_eq!(usage.output_tokens, 17);
    }
}
