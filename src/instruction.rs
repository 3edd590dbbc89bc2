//! Instructions: the declarative unit of model work.
//!
//! An [`Instruction`] bundles a prompt template, an optional typed output
//! schema and optional file attachments. Compiling it against the current
//! variable scope produces the user [`Message`] that opens an agent run:
//! placeholders substituted, schema guidance appended, files attached as
//! parts.

use crate::message::{FilePart, Message, UserPart};
use crate::schema::OutputSchema;
use crate::template::{render, VarMap};
use crate::Result;

/// A declarative model invocation.
#[derive(Debug, Clone)]
pub struct Instruction {
    prompt: String,
    schema: OutputSchema,
    files: Vec<FilePart>,
    strict_variables: bool,
}

impl Instruction {
    /// Create an instruction from a prompt template.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            schema: OutputSchema::new(),
            files: Vec::new(),
            strict_variables: false,
        }
    }

    /// Declare the typed output schema. The compiled prompt asks the model
    /// to wrap each field in matching tags, and the terminal text is
    /// parsed against this schema.
    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Attach a file to the compiled user message.
    pub fn with_file(mut self, file: FilePart) -> Self {
        self.files.push(file);
        self
    }

    /// Fail compilation on undefined `{{variables}}` instead of leaving
    /// the placeholder in place.
    pub fn strict_variables(mut self, strict: bool) -> Self {
        self.strict_variables = strict;
        self
    }

    /// The declared output schema.
    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    /// The raw prompt template.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Render the prompt against `vars` and build the user message.
    pub fn compile(&self, vars: &VarMap) -> Result<Message> {
        let mut text = render(&self.prompt, vars, self.strict_variables)?;

        if !self.schema.is_empty() {
            text.push_str("\n\n");
            text.push_str(&schema_guidance(&self.schema));
        }

        if self.files.is_empty() {
            return Ok(Message::user(text));
        }

        let mut parts = vec![UserPart::Text { text }];
        parts.extend(self.files.iter().cloned().map(UserPart::File));
        Ok(Message::user_with_parts(parts))
    }
}

/// Instruction text telling the model how to format its answer so the
/// response parser can recover each field.
fn schema_guidance(schema: &OutputSchema) -> String {
    let mut guidance = String::from(
        "Format your answer using exactly one tagged section per field, \
         with nothing outside the tags:\n",
    );
    for (name, kind) in schema.fields() {
        guidance.push_str(&format!("<{name}>{}</{name}>\n", kind.describe()));
    }
    guidance
}
