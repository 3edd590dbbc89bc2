//! Fan-out / fan-in example
//!
//! One root node produces a topic list; three nodes expand different
//! angles concurrently; a final node merges them and writes the result to
//! disk through an action step.

use axle::{
    FieldKind, GraphDefinition, GraphRunner, Instruction, NodeSpec, OpenAiProvider, OutputSchema,
    Step, VarMap, WriteToDisk,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let provider = Arc::new(OpenAiProvider::new(
        "http://localhost:11434/v1",
        "not-needed",
    )?);

    let angle = |focus: &str| {
        Instruction::new(format!(
            "Write one paragraph about {{{{subject}}}} focused on {focus}.\n\
             Context: {{{{research}}}}"
        ))
        .with_schema(OutputSchema::new().field("paragraph", FieldKind::String))
    };

    let graph = GraphDefinition::new()
        .node(
            "research",
            Instruction::new("List the three most important facts about {{subject}}.")
                .with_schema(OutputSchema::new().field("facts", FieldKind::StringArray)),
        )
        .node(
            "history",
            NodeSpec::new(angle("its history")).depends_on(["research"]),
        )
        .node(
            "present",
            NodeSpec::new(angle("its current state")).depends_on(["research"]),
        )
        .node(
            "future",
            NodeSpec::new(angle("where it is heading")).depends_on(["research"]),
        )
        .node(
            "merge",
            NodeSpec::steps(vec![
                Step::Instruct(
                    Instruction::new(
                        "Merge these sections into a short article:\n\n\
                         {{history}}\n\n{{present}}\n\n{{future}}",
                    )
                    .with_schema(OutputSchema::new().field("article", FieldKind::String)),
                ),
                Step::Act(Arc::new(WriteToDisk::new("out/{{subject}}.md"))),
            ])
            .depends_on(["history", "present", "future"]),
        );

    let runner = GraphRunner::builder(provider, "qwen3:8b")
        .max_concurrency(3)
        .build()?;

    let mut seed = VarMap::new();
    seed.insert("subject".to_string(), "container-orchestration".into());

    println!("Running fan-out graph...\n");
    let outcome = runner.run(&graph, seed).await;

    match outcome.error {
        Some(error) => eprintln!("Graph failed: {error}"),
        None => println!(
            "Done. Article written to out/container-orchestration.md\n\
             Tokens: {} in / {} out",
            outcome.usage.input_tokens, outcome.usage.output_tokens
        ),
    }

    Ok(())
}
