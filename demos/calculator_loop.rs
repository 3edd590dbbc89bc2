//! Calculator tool loop example
//!
//! Gives the agent a calculator tool and streams chunks to the terminal
//! while the turn loop runs.

use axle::{tool, Agent, OpenAiProvider, StreamChunk, ToolOutput};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let provider = Arc::new(OpenAiProvider::new(
        "http://localhost:11434/v1",
        "not-needed",
    )?);

    let calculator = tool("calc", "Evaluate basic arithmetic")
        .param("op", "string")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            let result = match args["op"].as_str() {
                Some("add") => a + b,
                Some("sub") => a - b,
                Some("mul") => a * b,
                Some("div") if b != 0.0 => a / b,
                Some("div") => return Err(axle::Error::tool("division by zero")),
                _ => return Err(axle::Error::tool("op must be add, sub, mul or div")),
            };
            Ok(ToolOutput::text(result.to_string()))
        });

    let mut agent = Agent::builder(provider, "qwen3:8b")
        .system("You are a careful assistant. Use the calc tool for arithmetic.")
        .tool(Arc::new(calculator))
        .max_iterations(5)
        .on_chunk(Arc::new(|chunk: &StreamChunk| match chunk {
            StreamChunk::TextDelta { text, .. } => {
                print!("{text}");
                let _ = std::io::Write::flush(&mut std::io::stdout());
            }
            StreamChunk::ToolCallStart { tool_name, .. } => {
                println!("\n[calling {tool_name}...]");
            }
            _ => {}
        }))
        .build()?;

    let outcome = agent
        .send("What is (17 * 23) + 101? Use the calculator.")
        .await?;

    println!("\n\nFinal answer: {}", outcome.message.text());
    println!("History: {} messages", agent.history().len());

    Ok(())
}
