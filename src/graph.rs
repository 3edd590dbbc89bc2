//! DAG scheduler: parse, validate, stage, execute.
//!
//! A [`GraphDefinition`] maps node ids to step lists plus dependencies.
//! Planning validates the graph (every dependency must exist, no cycles)
//! and layers it into stages: stage *k* holds the nodes whose dependencies
//! all live in stages `< k`. Nodes within a stage have no dependency
//! relationship and run concurrently, bounded by `max_concurrency`; the
//! stage boundary is a full happens-before fence, so a node always
//! observes the results of every node in earlier stages.
//!
//! Each node executes its steps serially. An instruction step compiles its
//! prompt against a snapshot of the variable map (plus prior step outputs
//! under `response`), runs a fresh [`Agent`] conversation, and parses the
//! terminal text against the instruction's schema. On success the node's
//! result is published to the shared variable map under the node id, where
//! downstream prompts reference it as `{{node-id}}`.

use crate::agent::{Agent, AgentStatus};
use crate::cancellation::CancellationToken;
use crate::instruction::Instruction;
use crate::message::Usage;
use crate::parser::parse_response;
use crate::provider::{GenerateOptions, Provider};
use crate::step::Step;
use crate::template::VarMap;
use crate::tools::ToolRegistry;
use crate::trace::{Span, SpanStatus, Tracer};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// Spec for one node: its steps and the nodes it depends on.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    steps: Vec<Step>,
    depends_on: Vec<String>,
}

impl NodeSpec {
    /// A single-step node.
    pub fn new(step: impl Into<Step>) -> Self {
        Self {
            steps: vec![step.into()],
            depends_on: Vec::new(),
        }
    }

    /// A multi-step node; steps run serially in order.
    pub fn steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            depends_on: Vec::new(),
        }
    }

    /// Declare dependencies on other nodes.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }
}

impl From<Instruction> for NodeSpec {
    fn from(instruction: Instruction) -> Self {
        NodeSpec::new(instruction)
    }
}

impl From<Step> for NodeSpec {
    fn from(step: Step) -> Self {
        NodeSpec::new(step)
    }
}

/// One vertex of the graph, normalized.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Node id, unique within the definition
    pub id: String,
    /// Steps executed serially
    pub steps: Vec<Step>,
    /// Ids of nodes whose results this node consumes
    pub dependencies: Vec<String>,
}

/// A user-declared workflow: named nodes with dependencies.
///
/// Declaration order is preserved and used to break ties when ordering
/// nodes within a stage, so plans are deterministic.
#[derive(Debug, Clone, Default)]
pub struct GraphDefinition {
    nodes: Vec<GraphNode>,
}

impl GraphDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Accepts an [`Instruction`], a [`Step`], or a full
    /// [`NodeSpec`] with dependencies.
    pub fn node(mut self, id: impl Into<String>, spec: impl Into<NodeSpec>) -> Self {
        let spec = spec.into();
        self.nodes.push(GraphNode {
            id: id.into(),
            steps: spec.steps,
            dependencies: spec.depends_on,
        });
        self
    }

    /// Look up a node by id.
    pub fn get(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Validate the graph and compute its execution plan.
    ///
    /// Fails on a duplicate id, a dependency naming a node that does not
    /// exist, or a cycle. A successful plan contains every node exactly
    /// once across its stages.
    pub fn plan(&self) -> Result<ExecutionPlan> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(Error::graph(format!("duplicate node id '{}'", node.id)));
            }
        }

        for node in &self.nodes {
            for dep in &node.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(Error::graph(format!(
                        "node '{}' depends on unknown node '{dep}'",
                        node.id
                    )));
                }
            }
        }

        self.check_cycles()?;

        // Kahn-style layering; `ready` is gathered in declaration order.
        let mut remaining: Vec<&GraphNode> = self.nodes.iter().collect();
        let mut completed: HashSet<&str> = HashSet::new();
        let mut stages: Vec<Vec<String>> = Vec::new();

        while !remaining.is_empty() {
            let (ready, rest): (Vec<&GraphNode>, Vec<&GraphNode>) = remaining
                .into_iter()
                .partition(|n| n.dependencies.iter().all(|d| completed.contains(d.as_str())));

            if ready.is_empty() {
                // The cycle check above makes this unreachable.
                return Err(Error::graph(
                    "no runnable nodes remain; cycle slipped past validation",
                ));
            }

            for node in &ready {
                completed.insert(node.id.as_str());
            }
            stages.push(ready.into_iter().map(|n| n.id.clone()).collect());
            remaining = rest;
        }

        Ok(ExecutionPlan { stages })
    }

    /// Cycle detection by three-color depth-first search.
    fn check_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let index: HashMap<&str, &GraphNode> =
            self.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut colors: HashMap<&str, Color> =
            self.nodes.iter().map(|n| (n.id.as_str(), Color::White)).collect();

        fn visit<'a>(
            id: &'a str,
            index: &HashMap<&'a str, &'a GraphNode>,
            colors: &mut HashMap<&'a str, Color>,
        ) -> Result<()> {
            colors.insert(id, Color::Gray);
            for dep in &index[id].dependencies {
                match colors[dep.as_str()] {
                    Color::Gray => {
                        return Err(Error::graph(format!("cycle involving '{dep}'")));
                    }
                    Color::White => visit(dep.as_str(), index, colors)?,
                    Color::Black => {}
                }
            }
            colors.insert(id, Color::Black);
            Ok(())
        }

        for node in &self.nodes {
            if colors[node.id.as_str()] == Color::White {
                visit(node.id.as_str(), &index, &mut colors)?;
            }
        }
        Ok(())
    }
}

/// Topological layering of a validated graph.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Stage *k* holds the nodes whose dependencies all completed in
    /// stages `< k`; stage 0 holds the roots.
    pub stages: Vec<Vec<String>>,
}

/// Result of one graph invocation.
#[derive(Debug)]
pub struct GraphOutcome {
    /// True when every node produced a result
    pub success: bool,
    /// Node id → result; `Null` for failed or skipped nodes
    pub response: VarMap,
    /// The surfaced error, when the run was aborted
    pub error: Option<Error>,
    /// Cumulative usage across all nodes
    pub usage: Usage,
}

/// Executes graphs against one provider/model/toolset configuration.
///
/// Build with [`GraphRunner::builder`]; `max_concurrency` defaults to 3
/// and `continue_on_error` to false.
#[derive(Clone)]
pub struct GraphRunner {
    provider: Arc<dyn Provider>,
    model: String,
    system: Option<String>,
    tools: ToolRegistry,
    options: GenerateOptions,
    max_concurrency: usize,
    continue_on_error: bool,
    max_iterations: Option<u32>,
    streaming: bool,
    tracer: Tracer,
    cancel: CancellationToken,
}

impl GraphRunner {
    /// Start building a runner for the given provider and model.
    pub fn builder(provider: Arc<dyn Provider>, model: impl Into<String>) -> GraphRunnerBuilder {
        GraphRunnerBuilder {
            provider,
            model: model.into(),
            system: None,
            tools: ToolRegistry::new(),
            options: GenerateOptions::default(),
            max_concurrency: 3,
            continue_on_error: false,
            max_iterations: None,
            streaming: true,
            tracer: Tracer::disabled(),
            cancel: None,
        }
    }

    /// Execute a graph with the given seed variables.
    ///
    /// Structural errors (unknown dependency, cycle) surface without any
    /// node having run. During execution, the first node failure cancels
    /// all outstanding work unless `continue_on_error` is set, in which
    /// case the failed node's slot is `Null` and its transitive dependents
    /// are skipped with `Null` slots.
    pub async fn run(&self, definition: &GraphDefinition, seed: VarMap) -> GraphOutcome {
        let plan = match definition.plan() {
            Ok(plan) => plan,
            Err(e) => {
                return GraphOutcome {
                    success: false,
                    response: VarMap::new(),
                    error: Some(e),
                    usage: Usage::default(),
                };
            }
        };

        let span = self.tracer.root_span("graph");
        let vars = Arc::new(Mutex::new(seed));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.max(1)));
        let run_cancel = self.cancel.child_token();

        let mut response = VarMap::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut usage = Usage::default();
        let mut first_error: Option<Error> = None;

        'stages: for stage in &plan.stages {
            let mut tasks: JoinSet<(String, Result<(Value, Usage)>)> = JoinSet::new();

            for node_id in stage {
                let node = definition
                    .get(node_id)
                    .expect("plan references a defined node")
                    .clone();

                if node.dependencies.iter().any(|d| failed.contains(d)) {
                    // Upstream failed; never run this node with missing
                    // inputs.
                    debug!(node = %node.id, "skipping node with failed dependency");
                    failed.insert(node.id.clone());
                    response.insert(node.id.clone(), Value::Null);
                    continue;
                }

                let runner = self.clone();
                let snapshot = vars.lock().expect("variable map poisoned").clone();
                let semaphore = Arc::clone(&semaphore);
                let cancel = run_cancel.clone();
                let node_span = span.child(format!("node:{}", node.id));

                tasks.spawn(async move {
                    let id = node.id.clone();
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (id, Err(Error::Cancelled)),
                    };
                    if cancel.is_cancelled() {
                        node_span.end(SpanStatus::Cancelled);
                        return (id, Err(Error::Cancelled));
                    }
                    let result = runner.run_node(&node, snapshot, &node_span, &cancel).await;
                    node_span.end(match &result {
                        Ok(_) => SpanStatus::Ok,
                        Err(e) if e.is_cancelled() => SpanStatus::Cancelled,
                        Err(_) => SpanStatus::Error,
                    });
                    (id, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, Ok((value, node_usage)))) => {
                        usage.add(node_usage);
                        vars.lock()
                            .expect("variable map poisoned")
                            .insert(id.clone(), value.clone());
                        response.insert(id, value);
                    }
                    Ok((id, Err(e))) => {
                        if e.is_cancelled() && first_error.is_some() {
                            // Sibling cancelled by the first failure; not
                            // a result of its own.
                            continue;
                        }
                        if self.continue_on_error && !e.is_cancelled() {
                            debug!(node = %id, error = %e, "node failed; continuing");
                            failed.insert(id.clone());
                            response.insert(id, Value::Null);
                        } else if first_error.is_none() {
                            first_error = Some(Error::node(id, e));
                            run_cancel.cancel();
                        }
                    }
                    Err(join_err) => {
                        if first_error.is_none() {
                            first_error = Some(Error::other(format!(
                                "node task panicked: {join_err}"
                            )));
                            run_cancel.cancel();
                        }
                    }
                }
            }

            if first_error.is_some() {
                break 'stages;
            }
            if self.cancel.is_cancelled() {
                first_error = Some(Error::Cancelled);
                break 'stages;
            }
        }

        let success = first_error.is_none() && failed.is_empty();
        span.end(if success {
            SpanStatus::Ok
        } else {
            SpanStatus::Error
        });

        GraphOutcome {
            success,
            response,
            error: first_error,
            usage,
        }
    }

    /// Run one node's steps serially against its scope snapshot.
    async fn run_node(
        &self,
        node: &GraphNode,
        mut scope: VarMap,
        span: &Span,
        cancel: &CancellationToken,
    ) -> Result<(Value, Usage)> {
        let mut response = Value::Null;
        let mut usage = Usage::default();

        for step in &node.steps {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match step {
                Step::Instruct(instruction) => {
                    let message = instruction.compile(&scope)?;

                    let mut agent = {
                        let mut builder =
                            Agent::builder(Arc::clone(&self.provider), self.model.clone())
                                .registry(self.tools.clone())
                                .options(self.options.clone())
                                .streaming(self.streaming)
                                .tracer(self.tracer.clone())
                                .parent_span(span.clone())
                                .cancellation(cancel.child_token());
                        if let Some(system) = &self.system {
                            builder = builder.system(system.clone());
                        }
                        if let Some(limit) = self.max_iterations {
                            builder = builder.max_iterations(limit);
                        }
                        builder.build()?
                    };

                    let outcome = agent.send_message(message).await?;
                    usage.add(outcome.usage);
                    if outcome.status == AgentStatus::Cancelled {
                        return Err(Error::Cancelled);
                    }

                    let parsed =
                        parse_response(&outcome.message.text(), instruction.schema())?;
                    scope.insert("response".to_string(), parsed.clone());
                    response = parsed;
                }
                Step::Act(action) => {
                    if let Some(value) = action.run(&scope).await? {
                        scope.insert("response".to_string(), value.clone());
                        response = value;
                    }
                }
            }
        }

        Ok((response, usage))
    }
}

impl std::fmt::Debug for GraphRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRunner")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("max_concurrency", &self.max_concurrency)
            .field("continue_on_error", &self.continue_on_error)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Builder for [`GraphRunner`].
pub struct GraphRunnerBuilder {
    provider: Arc<dyn Provider>,
    model: String,
    system: Option<String>,
    tools: ToolRegistry,
    options: GenerateOptions,
    max_concurrency: usize,
    continue_on_error: bool,
    max_iterations: Option<u32>,
    streaming: bool,
    tracer: Tracer,
    cancel: Option<CancellationToken>,
}

impl GraphRunnerBuilder {
    /// System prompt seeding every node's conversation.
    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.system = Some(prompt.into());
        self
    }

    /// Tool registry offered to every instruction.
    pub fn registry(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Sampling options forwarded to the provider.
    pub fn options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    /// Concurrent node executions allowed within a stage (default 3).
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Keep running independent nodes after a failure (default false).
    pub fn continue_on_error(mut self, yes: bool) -> Self {
        self.continue_on_error = yes;
        self
    }

    /// Per-agent turn-loop iteration cap.
    pub fn max_iterations(mut self, limit: u32) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    /// Use non-streaming generation.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Attach a tracer.
    pub fn tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Chain cancellation from the given token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<GraphRunner> {
        if self.model.trim().is_empty() {
            return Err(Error::config("model cannot be empty or whitespace"));
        }
        if self.max_concurrency == 0 {
            return Err(Error::config("max_concurrency must be at least 1"));
        }

        Ok(GraphRunner {
            provider: self.provider,
            model: self.model,
            system: self.system,
            tools: self.tools,
            options: self.options,
            max_concurrency: self.max_concurrency,
            continue_on_error: self.continue_on_error,
            max_iterations: self.max_iterations,
            streaming: self.streaming,
            tracer: self.tracer,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}
