//! Cancellation propagation from the top-level call down through graph
//! nodes and provider streams.

mod common;

use axle::{
    cancel_after, CancellationToken, FieldKind, FinishReason, GraphDefinition, GraphRunner,
    Instruction, NodeSpec, OutputSchema, Provider, StreamChunk, Usage, VarMap,
};
use common::{response_turn, StubProvider};
use std::sync::Arc;
use std::time::Duration;

fn slow_turn(words: &[&str]) -> Vec<StreamChunk> {
    let mut chunks = vec![
        StreamChunk::Start {
            id: "m".to_string(),
            model: "stub-model".to_string(),
        },
        StreamChunk::TextStart { index: 0 },
    ];
    for word in words {
        chunks.push(StreamChunk::TextDelta {
            index: 0,
            text: (*word).to_string(),
        });
    }
    chunks.push(StreamChunk::TextComplete { index: 0 });
    chunks.push(StreamChunk::Complete {
        finish_reason: FinishReason::Stop,
        usage: Usage {
            input_tokens: 1,
            output_tokens: 1,
        },
    });
    chunks
}

#[tokio::test]
async fn test_graph_cancelled_by_timeout_token() {
    // Every node is slow; the deadline fires mid-run and the whole graph
    // surfaces a cancellation instead of completing.
    let provider = Arc::new(
        StubProvider::keyed(vec![
            ("first", slow_turn(&["a ", "b ", "c ", "d ", "e ", "f ", "g ", "h "])),
            ("second", slow_turn(&["x ", "y ", "z "])),
        ])
        .with_chunk_delay(Duration::from_millis(40)),
    );

    let cancel = CancellationToken::new();
    let graph = GraphDefinition::new()
        .node("one", Instruction::new("first"))
        .node("two", NodeSpec::new(Instruction::new("second {{one}}")).depends_on(["one"]));

    let runner = GraphRunner::builder(provider, "stub-model")
        .cancellation(cancel.clone())
        .build()
        .unwrap();

    cancel_after(&cancel, Duration::from_millis(100));
    let outcome = runner.run(&graph, VarMap::new()).await;

    assert!(!outcome.success);
    let error = outcome.error.expect("cancellation should surface");
    assert!(error.is_cancelled(), "got: {error}");
    // The dependent node never published a result.
    assert!(!outcome.response.contains_key("two"));
}

#[tokio::test]
async fn test_graph_unaffected_by_unrelated_token() {
    let provider = Arc::new(StubProvider::keyed(vec![(
        "task",
        response_turn("done"),
    )]));

    let unrelated = CancellationToken::new();
    unrelated.cancel();

    let graph = GraphDefinition::new().node(
        "a",
        Instruction::new("task")
            .with_schema(OutputSchema::new().field("response", FieldKind::String)),
    );
    let runner = GraphRunner::builder(provider, "stub-model").build().unwrap();
    let outcome = runner.run(&graph, VarMap::new()).await;

    assert!(outcome.success);
}

#[tokio::test]
async fn test_pre_cancelled_runner_does_no_work() {
    let provider = Arc::new(StubProvider::keyed(vec![(
        "task",
        response_turn("never"),
    )]));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let graph = GraphDefinition::new().node("a", Instruction::new("task"));
    let runner = GraphRunner::builder(Arc::clone(&provider) as Arc<dyn Provider>, "stub-model")
        .cancellation(cancel)
        .build()
        .unwrap();
    let outcome = runner.run(&graph, VarMap::new()).await;

    assert!(!outcome.success);
    assert!(outcome.error.expect("should surface").is_cancelled());
}
