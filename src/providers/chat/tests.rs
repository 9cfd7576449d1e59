use std::sync::{Arc, Mutex};

use serde_json::json;

use super::*;
use crate::test_support::{MockResponse, MockServer};

fn collector() -> (CompletionOptions, Arc<Mutex<Vec<StreamChunk>>>) {
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&chunks);
    let options = CompletionOptions::streaming(Arc::new(move |chunk: StreamChunk| {
        sink.lock().expect("chunk lock").push(chunk);
    }));
    (options, chunks)
}

async fn run(
    server: &MockServer,
    request: &CompletionRequest,
    options: &CompletionOptions,
) -> Result<Completion, ProviderError> {
    let transport = HttpTransport::new(5_000).expect("valid timeout");
    ChatEndpoint {
        provider: "open_ai",
        transport: &transport,
        url: format!("{}/chat/completions", server.url()),
        model: "gpt-4o",
        max_tokens: Some(128),
        auth: RequestAuth::bearer("sk-test"),
    }
    .complete(request, options)
    .await
}

#[test]
fn test_request_body_omits_stream_flag_when_false() {
    let body = ChatRequestBody {
        model: "gpt-4o".to_string(),
        messages: vec![Message::user("hi")],
        max_tokens: None,
        stream: false,
    };

    assert_eq!(
        serde_json::to_value(&body).expect("body serializes"),
        json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        })
    );
}

#[tokio::test]
async fn test_completion_returns_first_choice_message() {
    let server = MockServer::start(vec![MockResponse::json(
        r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}},{"message":{"content":"ignored"}}]}"#,
    )]);

    let completion = run(&server, &"hi".into(), &CompletionOptions::default())
        .await
        .expect("completion should succeed");

    assert_eq!(completion, Completion::Message(Message::assistant("Hello!")));
    let request = &server.captured()[0];
    assert_eq!(request.path(), "/chat/completions");
    assert_eq!(
        request.json_body(),
        json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 128
        })
    );
}

#[tokio::test]
async fn test_null_content_is_empty_completion() {
    let server = MockServer::start(vec![MockResponse::json(
        r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#,
    )]);

    let completion = run(&server, &"hi".into(), &CompletionOptions::default())
        .await
        .expect("empty content is not an error");

    assert_eq!(completion, Completion::Empty);
}

#[tokio::test]
async fn test_missing_choices_is_protocol_error() {
    let server = MockServer::start(vec![MockResponse::json(r#"{"choices":[]}"#)]);

    let error = run(&server, &"hi".into(), &CompletionOptions::default())
        .await
        .expect_err("no choices");

    assert!(matches!(error, ProviderError::Protocol { .. }));
}

#[tokio::test]
async fn test_stream_forwards_deltas_then_done() {
    let server = MockServer::start(vec![MockResponse::event_stream(&[
        r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
        "not json",
        r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
        "[DONE]",
    ])]);
    let (options, chunks) = collector();

    let completion = run(&server, &"hi".into(), &options)
        .await
        .expect("stream should succeed");

    assert_eq!(completion, Completion::Streamed);
    assert_eq!(
        *chunks.lock().expect("chunk lock"),
        vec![
            StreamChunk::Delta("Hel".to_string()),
            StreamChunk::Delta("lo".to_string()),
            StreamChunk::Done,
        ]
    );
    assert_eq!(server.captured()[0].json_body()["stream"], json!(true));
}

#[tokio::test]
async fn test_aborted_stream_still_ends_with_done() {
    let server = MockServer::start(vec![MockResponse::event_stream(&[
        r#"{"choices":[{"delta":{"content":"a"}}]}"#,
        r#"{"choices":[{"delta":{"content":"b"}}]}"#,
        r#"{"choices":[{"delta":{"content":"c"}}]}"#,
        "[DONE]",
    ])]);
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&chunks);
    let probe = Arc::clone(&chunks);
    let options = CompletionOptions::streaming(Arc::new(move |chunk: StreamChunk| {
        sink.lock().expect("chunk lock").push(chunk);
    }))
    .with_abort(Arc::new(move || {
        !probe.lock().expect("chunk lock").is_empty()
    }));

    let completion = run(&server, &"hi".into(), &options)
        .await
        .expect("abort is not an error");

    assert_eq!(completion, Completion::Streamed);
    assert_eq!(
        *chunks.lock().expect("chunk lock"),
        vec![StreamChunk::Delta("a".to_string()), StreamChunk::Done]
    );
}

#[tokio::test]
async fn test_stream_status_error_emits_nothing() {
    let server = MockServer::start(vec![MockResponse::status(503, "overloaded")]);
    let (options, chunks) = collector();

    let error = run(&server, &"hi".into(), &options)
        .await
        .expect_err("503 should fail");

    assert!(matches!(
        error,
        ProviderError::Status {
            status_code: 503,
            ..
        }
    ));
    assert!(chunks.lock().expect("chunk lock").is_empty());
}
