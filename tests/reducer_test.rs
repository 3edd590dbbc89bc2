//! Stream-reduction properties driven through the async drive loop.

mod common;

use axle::{
    reduce_stream, AssistantPart, CancellationToken, ChunkFanout, ChunkStream, FinishReason,
    SharedReducer, StreamChunk, StreamStatus, Usage,
};
use futures::StreamExt;
use std::sync::{Arc, Mutex};

fn chunk_stream(chunks: Vec<StreamChunk>) -> ChunkStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// A stream that yields the given chunks and then never ends.
fn stalling_stream(chunks: Vec<StreamChunk>) -> ChunkStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)).chain(futures::stream::pending()))
}

fn interleaved_turn() -> Vec<StreamChunk> {
    vec![
        StreamChunk::Start {
            id: "m1".to_string(),
            model: "test".to_string(),
        },
        StreamChunk::ThinkingStart {
            index: 0,
            id: None,
            redacted: false,
        },
        StreamChunk::ThinkingDelta {
            index: 0,
            text: "consider".to_string(),
        },
        StreamChunk::ThinkingDelta {
            index: 0,
            text: " carefully".to_string(),
        },
        StreamChunk::ThinkingComplete {
            index: 0,
            signature: None,
        },
        StreamChunk::TextStart { index: 1 },
        StreamChunk::TextDelta {
            index: 1,
            text: "Hel".to_string(),
        },
        StreamChunk::TextDelta {
            index: 1,
            text: "lo".to_string(),
        },
        StreamChunk::TextComplete { index: 1 },
        StreamChunk::Complete {
            finish_reason: FinishReason::Stop,
            usage: Usage {
                input_tokens: 4,
                output_tokens: 6,
            },
        },
    ]
}

#[tokio::test]
async fn test_chunk_to_message_fidelity() {
    let shared = SharedReducer::new();
    let fanout = ChunkFanout::new();
    let cancel = CancellationToken::new();

    let outcome = reduce_stream(chunk_stream(interleaved_turn()), &shared, &fanout, &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.status, StreamStatus::Succeeded);
    // Parts in ascending index order; deltas concatenated per part.
    assert!(matches!(
        &outcome.message.content[0],
        AssistantPart::Thinking { text, .. } if text == "consider carefully"
    ));
    assert!(matches!(
        &outcome.message.content[1],
        AssistantPart::Text { text } if text == "Hello"
    ));
    assert_eq!(outcome.message.finish_reason, Some(FinishReason::Stop));
    assert_eq!(outcome.usage.output_tokens, 6);
}

#[tokio::test]
async fn test_rechunking_does_not_change_the_message() {
    // The same text split at different boundaries reduces identically.
    let split_a = interleaved_turn();
    let mut split_b = vec![
        StreamChunk::Start {
            id: "m1".to_string(),
            model: "test".to_string(),
        },
        StreamChunk::ThinkingStart {
            index: 0,
            id: None,
            redacted: false,
        },
    ];
    for piece in ["con", "sider car", "efully"] {
        split_b.push(StreamChunk::ThinkingDelta {
            index: 0,
            text: piece.to_string(),
        });
    }
    split_b.push(StreamChunk::ThinkingComplete {
        index: 0,
        signature: None,
    });
    split_b.push(StreamChunk::TextStart { index: 1 });
    for piece in ["H", "e", "l", "l", "o"] {
        split_b.push(StreamChunk::TextDelta {
            index: 1,
            text: piece.to_string(),
        });
    }
    split_b.push(StreamChunk::TextComplete { index: 1 });
    split_b.push(StreamChunk::Complete {
        finish_reason: FinishReason::Stop,
        usage: Usage {
            input_tokens: 4,
            output_tokens: 6,
        },
    });

    let reduce = |chunks: Vec<StreamChunk>| async {
        let shared = SharedReducer::new();
        reduce_stream(
            chunk_stream(chunks),
            &shared,
            &ChunkFanout::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    };

    let a = reduce(split_a).await;
    let b = reduce(split_b).await;
    assert_eq!(
        serde_json::to_value(&a.message).unwrap(),
        serde_json::to_value(&b.message).unwrap()
    );
}

#[tokio::test]
async fn test_fanout_sees_chunks_in_production_order() {
    let shared = SharedReducer::new();
    let fanout = ChunkFanout::new();
    let cancel = CancellationToken::new();

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    fanout.subscribe(Arc::new(move |chunk: &StreamChunk| {
        let tag = serde_json::to_value(chunk).unwrap()["type"]
            .as_str()
            .unwrap()
            .to_string();
        sink.lock().unwrap().push(tag);
    }));

    reduce_stream(chunk_stream(interleaved_turn()), &shared, &fanout, &cancel)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            "start",
            "thinking-start",
            "thinking-delta",
            "thinking-delta",
            "thinking-complete",
            "text-start",
            "text-delta",
            "text-delta",
            "text-complete",
            "complete",
        ]
    );
}

#[tokio::test]
async fn test_cancel_before_first_chunk() {
    // Property 8, first half: nothing arrived, so nothing is reported.
    let shared = SharedReducer::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = reduce_stream(
        Box::pin(futures::stream::pending()),
        &shared,
        &ChunkFanout::new(),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, StreamStatus::Cancelled);
    assert!(outcome.message.content.is_empty());
    assert_eq!(outcome.usage, Usage::default());
}

#[tokio::test]
async fn test_cancel_after_n_chunks_keeps_exactly_those_chunks() {
    // Property 8, second half: the partial is the reduction of the chunks
    // that arrived before the cancel point.
    let prefix = vec![
        StreamChunk::Start {
            id: "m1".to_string(),
            model: "test".to_string(),
        },
        StreamChunk::TextStart { index: 0 },
        StreamChunk::TextDelta {
            index: 0,
            text: "partial ".to_string(),
        },
        StreamChunk::TextDelta {
            index: 0,
            text: "answer".to_string(),
        },
    ];

    let shared = SharedReducer::new();
    let cancel = CancellationToken::new();
    let fanout = ChunkFanout::new();

    let driver = {
        let shared = shared.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            reduce_stream(stalling_stream(prefix), &shared, &fanout, &cancel).await
        })
    };

    // Give the drive loop time to consume the ready chunks, then cancel.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel.cancel();

    let outcome = driver.await.unwrap().unwrap();
    assert_eq!(outcome.status, StreamStatus::Cancelled);
    assert_eq!(outcome.message.text(), "partial answer");
    assert_eq!(outcome.message.finish_reason, Some(FinishReason::Cancelled));
    assert_eq!(outcome.usage, Usage::default());
}

#[tokio::test]
async fn test_snapshot_readable_mid_stream() {
    let shared = SharedReducer::new();
    let cancel = CancellationToken::new();
    let fanout = ChunkFanout::new();

    let prefix = vec![
        StreamChunk::Start {
            id: "m1".to_string(),
            model: "test".to_string(),
        },
        StreamChunk::TextStart { index: 0 },
        StreamChunk::TextDelta {
            index: 0,
            text: "visible".to_string(),
        },
    ];

    let driver = {
        let shared = shared.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            reduce_stream(stalling_stream(prefix), &shared, &fanout, &cancel).await
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    // Another task reads the partial while the stream is still open.
    assert_eq!(shared.snapshot().text(), "visible");
    assert_eq!(shared.status(), StreamStatus::Streaming);

    cancel.cancel();
    driver.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stream_ending_without_terminal_chunk_is_an_error() {
    let shared = SharedReducer::new();
    let outcome = reduce_stream(
        chunk_stream(vec![StreamChunk::TextStart { index: 0 }]),
        &shared,
        &ChunkFanout::new(),
        &CancellationToken::new(),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(shared.status(), StreamStatus::Failed);
}

#[tokio::test]
async fn test_provider_stream_cancellation_end_to_end() {
    // Through the stub provider: a slow stream cancelled mid-flight.
    use common::StubProvider;

    let chunks: Vec<StreamChunk> = {
        let mut v = vec![
            StreamChunk::Start {
                id: "m1".to_string(),
                model: "stub-model".to_string(),
            },
            StreamChunk::TextStart { index: 0 },
        ];
        for word in ["Once ", "upon ", "a ", "time ", "there ", "was ", "more"] {
            v.push(StreamChunk::TextDelta {
                index: 0,
                text: word.to_string(),
            });
        }
        v.push(StreamChunk::TextComplete { index: 0 });
        v.push(StreamChunk::Complete {
            finish_reason: FinishReason::Stop,
            usage: Usage {
                input_tokens: 1,
                output_tokens: 100,
            },
        });
        v
    };

    let provider = Arc::new(
        StubProvider::sequential(vec![chunks]).with_chunk_delay(std::time::Duration::from_millis(
            30,
        )),
    );

    let cancel = CancellationToken::new();
    let mut agent = axle::Agent::builder(provider, "stub-model")
        .cancellation(cancel.clone())
        .build()
        .unwrap();

    axle::cancel_after(&cancel, std::time::Duration::from_millis(150));
    let outcome = agent.send("tell me a story").await.unwrap();

    assert_eq!(outcome.status, axle::AgentStatus::Cancelled);
    let partial = outcome.message.text();
    assert!(
        "Once upon a time there was more".starts_with(&partial),
        "partial '{partial}' should be a prefix"
    );
    assert!(!partial.contains("more"), "the tail should not have arrived");
    // No Complete chunk was applied, so no usage was recorded.
    assert_eq!(outcome.usage, Usage::default());
}
