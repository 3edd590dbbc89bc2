//! Steps: the units a graph node executes in order.
//!
//! A step is either an [`Instruction`] (a model call whose parsed result
//! becomes the node's `response`) or an [`Action`] (a pure side-effect run
//! against the accumulated scope, e.g. writing the response to disk). A
//! node's result is its final step's output; an action that returns
//! nothing leaves the previous `response` in place.

use crate::instruction::Instruction;
use crate::template::{render, VarMap};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// A pure side-effect executed between or after instructions.
#[async_trait]
pub trait Action: Send + Sync {
    /// Name used in traces and error messages.
    fn name(&self) -> &str;

    /// Run against the node's accumulated scope.
    ///
    /// Returning `Some(value)` overwrites the node's `response`; `None`
    /// leaves it untouched.
    async fn run(&self, scope: &VarMap) -> Result<Option<Value>>;
}

/// One element of a node's step list.
#[derive(Clone)]
pub enum Step {
    /// A model call
    Instruct(Instruction),
    /// A side-effect
    Act(Arc<dyn Action>),
}

impl From<Instruction> for Step {
    fn from(instruction: Instruction) -> Self {
        Step::Instruct(instruction)
    }
}

impl<A: Action + 'static> From<Arc<A>> for Step {
    fn from(action: Arc<A>) -> Self {
        Step::Act(action)
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Instruct(instruction) => f
                .debug_tuple("Instruct")
                .field(&instruction.prompt())
                .finish(),
            Step::Act(action) => f.debug_tuple("Act").field(&action.name()).finish(),
        }
    }
}

/// Reference action: write a scope variable to a file.
///
/// The path is itself a template rendered against the scope, so a node can
/// write to `out/{{topic}}.md`. Parent directories are created as needed.
#[derive(Debug, Clone)]
pub struct WriteToDisk {
    path_template: String,
    variable: String,
}

impl WriteToDisk {
    /// Write the node's current `response` to `path_template`.
    pub fn new(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
            variable: "response".to_string(),
        }
    }

    /// Write a different scope variable instead of `response`.
    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.variable = name.into();
        self
    }
}

#[async_trait]
impl Action for WriteToDisk {
    fn name(&self) -> &str {
        "write_to_disk"
    }

    async fn run(&self, scope: &VarMap) -> Result<Option<Value>> {
        let value = scope.get(&self.variable).ok_or_else(|| {
            Error::invalid_input(format!(
                "write_to_disk: variable '{}' is not in scope",
                self.variable
            ))
        })?;

        let contents = match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other)?,
        };

        let path = PathBuf::from(render(&self.path_template, scope, true)?);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&path, contents).await?;

        Ok(None)
    }
}
