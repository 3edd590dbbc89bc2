//! Simple pipeline example
//!
//! Two chained nodes: the first outlines a topic, the second writes a
//! summary from the outline. Expects an OpenAI-compatible server on
//! localhost (LM Studio, Ollama, etc.).

use axle::{
    FieldKind, GraphDefinition, GraphRunner, Instruction, NodeSpec, OpenAiProvider, OutputSchema,
    VarMap,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let provider = Arc::new(OpenAiProvider::new(
        "http://localhost:11434/v1",
        "not-needed",
    )?);

    let graph = GraphDefinition::new()
        .node(
            "outline",
            Instruction::new("Write a three-point outline about {{topic}}.")
                .with_schema(OutputSchema::new().field("outline", FieldKind::String)),
        )
        .node(
            "summary",
            NodeSpec::new(
                Instruction::new(
                    "Turn this outline into a two-sentence summary:\n\n{{outline}}",
                )
                .with_schema(OutputSchema::new().field("summary", FieldKind::String)),
            )
            .depends_on(["outline"]),
        );

    let runner = GraphRunner::builder(provider, "qwen3:8b").build()?;

    let mut seed = VarMap::new();
    seed.insert("topic".to_string(), "Rust async streams".into());

    println!("Running pipeline...\n");
    let outcome = runner.run(&graph, seed).await;

    if let Some(error) = outcome.error {
        eprintln!("Pipeline failed: {error}");
        return Ok(());
    }

    println!("Outline: {}", outcome.response["outline"]["outline"]);
    println!("Summary: {}", outcome.response["summary"]["summary"]);
    println!(
        "\nTokens: {} in / {} out",
        outcome.usage.input_tokens, outcome.usage.output_tokens
    );

    Ok(())
}
