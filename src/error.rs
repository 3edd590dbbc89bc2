//! Error types for the axle orchestration library

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library.
///
/// Variants are organized by the layer that produces them: transport and
/// provider errors terminate the current model turn, parse errors terminate
/// the current node, and graph-structure errors are raised at parse time
/// before any node executes.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error (provider transport)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error (attachments, actions, batch ledger)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Semantic error reported by the model server
    #[error("Provider error: {0}")]
    Provider(String),

    /// Streaming error: malformed chunk, broken SSE frame, or tool-call
    /// arguments that did not decode to a JSON object
    #[error("Streaming error: {0}")]
    Stream(String),

    /// The model requested a tool that is not registered
    #[error("Unknown tool: {name}")]
    ToolNotFound {
        /// Name the model invented
        name: String,
    },

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Terminal text did not satisfy the declared output schema
    #[error("Response parse error: {0}")]
    Parse(String),

    /// Graph-structure error (unknown dependency or cycle), raised at
    /// parse time before any node runs
    #[error("Graph error: {0}")]
    Graph(String),

    /// A node failed during graph execution
    #[error("Node '{node}' failed: {source}")]
    Node {
        /// Id of the failing node
        node: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The operation was cancelled cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// The agent loop exceeded its iteration budget
    #[error("Agent exceeded {limit} iterations without terminating")]
    MaxIterations {
        /// The configured budget
        limit: u32,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider(msg.into())
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a tool-not-found error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Error::ToolNotFound { name: name.into() }
    }

    /// Create a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Create a new graph error
    pub fn graph(msg: impl Into<String>) -> Self {
        Error::Graph(msg.into())
    }

    /// Wrap an error as a node failure
    pub fn node(node: impl Into<String>, source: Error) -> Self {
        Error::Node {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// True if this error (or, for node failures, its cause) is a
    /// cooperative cancellation rather than a real fault.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Node { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
