//! Tool contract and registry.
//!
//! A tool is a named capability the model can invoke by emitting a
//! tool-call part: `{name, description, schema, execute}`. The core treats
//! tools as opaque; input validation against the schema is the tool's own
//! responsibility, and the registry is read-only during execution.
//!
//! Two ways to define a tool:
//!
//! 1. Implement [`Tool`] directly for full control (state, cancellation).
//! 2. Use the [`tool()`] builder for the common closure case:
//!
//! ```rust
//! use axle::{tool, ToolOutput};
//!
//! let add = tool("add", "Add two numbers")
//!     .param("a", "number")
//!     .param("b", "number")
//!     .build(|args| async move {
//!         let a = args["a"].as_f64().unwrap_or(0.0);
//!         let b = args["b"].as_f64().unwrap_or(0.0);
//!         Ok(ToolOutput::text((a + b).to_string()))
//!     });
//! ```

use crate::message::ToolResultPart;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a tool hands back: plain text, or an ordered mix of text and
/// images.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    Parts(Vec<ToolResultPart>),
}

impl ToolOutput {
    /// Plain-text output.
    pub fn text(text: impl Into<String>) -> Self {
        ToolOutput::Text(text.into())
    }

    /// JSON output, stringified for the model.
    pub fn json(value: &Value) -> Self {
        ToolOutput::Text(value.to_string())
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

/// Wire-level tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name the model calls it by
    pub name: String,
    /// Description the model uses to decide when to call it
    pub description: String,
    /// JSON Schema for the input object
    pub schema: Value,
}

/// A named, executable capability offered to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls this tool by.
    fn name(&self) -> &str;

    /// Description sent to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the input object.
    fn schema(&self) -> Value;

    /// Run the tool.
    ///
    /// `cancel` fires when the surrounding turn is cancelled; honoring it
    /// is the tool's concern, and the agent stops issuing new turns either
    /// way.
    async fn execute(&self, input: Value, cancel: CancellationToken) -> Result<ToolOutput>;

    /// The wire-level definition for this tool.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            schema: self.schema(),
        }
    }
}

/// Handler type for closure-backed tools.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send>> + Send + Sync>;

/// A tool backed by an async closure, produced by [`tool()`].
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    handler: ToolHandler,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, input: Value, _cancel: CancellationToken) -> Result<ToolOutput> {
        (self.handler)(input).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Builder for closure-backed tools with a fluent API.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({}),
        }
    }

    /// Set the complete input schema, replacing anything added so far.
    ///
    /// Accepts simple type notation (`{"x": "number"}`), extended
    /// per-property schemas, or a full JSON Schema; see
    /// [`normalize_schema`] for the conversion rules.
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Add one required parameter with a simple type string
    /// ("string", "number", "integer", "boolean", "array", "object").
    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        if !self.schema.is_object() {
            self.schema = serde_json::json!({});
        }
        let obj = self
            .schema
            .as_object_mut()
            .expect("BUG: schema should be an object after initialization");
        obj.insert(name.to_string(), Value::String(type_str.to_string()));
        self
    }

    /// Finalize with a handler and produce the tool.
    pub fn build<F, Fut>(self, handler: F) -> FnTool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        FnTool {
            name: self.name,
            description: self.description,
            schema: normalize_schema(self.schema),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }
}

/// Start building a closure-backed tool.
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// Normalize a loosely-written schema to standard JSON Schema.
///
/// Tool authors can hand the builder any of:
///
/// - a full JSON Schema (object type with a `properties` map), used
///   as-is;
/// - simple type notation, `{"location": "string"}`, where every entry
///   becomes a required property of the aliased type;
/// - per-property schemas carrying the non-standard `optional` and
///   `required` markers, which are stripped and resolved into the
///   top-level `required` array (a property with a `default` counts as
///   optional unless explicitly marked otherwise).
pub fn normalize_schema(schema: Value) -> Value {
    let Value::Object(fields) = schema else {
        return empty_object_schema();
    };

    let already_normalized = fields.get("type").and_then(Value::as_str) == Some("object")
        && fields.contains_key("properties");
    if already_normalized {
        return Value::Object(fields);
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (name, declaration) in fields {
        let (property, mandatory) = expand_property(declaration);
        if mandatory {
            required.push(Value::String(name.clone()));
        }
        properties.insert(name, property);
    }

    let mut normalized = serde_json::Map::new();
    normalized.insert("type".to_string(), Value::String("object".to_string()));
    normalized.insert("properties".to_string(), Value::Object(properties));
    normalized.insert("required".to_string(), Value::Array(required));
    Value::Object(normalized)
}

fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// Expand one property declaration into its schema and whether the
/// parameter is mandatory.
fn expand_property(declaration: Value) -> (Value, bool) {
    match declaration {
        // Bare type alias; simple notation has no way to say optional.
        Value::String(alias) => {
            let schema = serde_json::json!({ "type": scalar_type(&alias) });
            (schema, true)
        }
        Value::Object(mut property) => {
            // optional/required are not JSON Schema keywords; strip them
            // here and express them through the required array instead.
            let marked_optional =
                property.remove("optional").and_then(|v| v.as_bool()) == Some(true);
            let marked_required = property.remove("required").and_then(|v| v.as_bool());
            let has_default = property.contains_key("default");

            let mandatory = match marked_required {
                Some(explicit) => explicit,
                None => !marked_optional && !has_default,
            };
            (Value::Object(property), mandatory)
        }
        other => (other, true),
    }
}

/// JSON Schema type name for a friendly alias. Unrecognized aliases fall
/// back to `string` so a typo degrades the schema rather than failing
/// tool construction.
fn scalar_type(alias: &str) -> &'static str {
    match alias {
        "object" | "map" => "object",
        "array" | "list" => "array",
        "boolean" | "bool" => "boolean",
        "integer" | "int" => "integer",
        "number" | "float" | "f64" => "number",
        _ => "string",
    }
}

/// Name-keyed, read-only-during-execution tool registry.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name. Replaces any previous tool with
    /// the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Wire-level specs for every registered tool, sorted by name for
    /// deterministic request bodies.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .finish()
    }
}
