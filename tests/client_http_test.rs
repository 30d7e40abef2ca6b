//! ChatClient tests against a mock chat-completions endpoint
//!
//! Covers the streaming path, upstream errors, the non-streaming retry
//! policy, the fallback policy, and spawned sessions.

use futures::StreamExt;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamchat::retry::RetryConfig;
use streamchat::{ChatClient, ChatCompletionMessage, ClientOptions, Error, StreamCallbacks};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": fragment}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(fragments: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse_body(fragments))
}

fn completion_response(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    }))
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_retries(max_retries)
        .with_initial_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(50))
        .with_attempt_timeout(Duration::from_secs(5))
}

fn client_for(server: &MockServer, retry: RetryConfig) -> ChatClient {
    let _ = env_logger::builder().is_test(true).try_init();
    ChatClient::new(
        ClientOptions::builder()
            .proxy_url(format!("{}/chat", server.uri()))
            .model("test-model")
            .retry(retry)
            .build()
            .unwrap(),
    )
    .unwrap()
}

fn messages() -> Vec<ChatCompletionMessage> {
    vec![
        ChatCompletionMessage::system("be brief"),
        ChatCompletionMessage::user("hi"),
    ]
}

fn collecting_callbacks() -> (StreamCallbacks, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>) {
    let deltas = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let d = deltas.clone();
    let e = errors.clone();
    let callbacks = StreamCallbacks::new()
        .on_delta(move |delta| d.lock().unwrap().push(delta.text.clone()))
        .on_error(move |_, err| e.lock().unwrap().push(err.to_string()));
    (callbacks, deltas, errors)
}

#[tokio::test]
async fn test_stream_reply_accumulates_deltas() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({"model": "test-model", "stream": true})))
        .respond_with(sse_response(&["He", "llo"]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(0));
    let (callbacks, deltas, errors) = collecting_callbacks();

    let text = assert_ok!(
        client
            .stream_reply(&messages(), None, &CancellationToken::new(), callbacks)
            .await
    );

    assert_eq!(text, "Hello");
    assert_eq!(*deltas.lock().unwrap(), vec!["He", "llo"]);
    assert!(errors.lock().unwrap().is_empty());

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["messages"][0], json!({"role": "system", "content": "be brief"}));
    assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
}

#[tokio::test]
async fn test_stream_reply_model_override() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "qwen-vl-max"})))
        .respond_with(sse_response(&["ok"]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(0));
    let text = client
        .stream_reply(
            &messages(),
            Some("qwen-vl-max"),
            &CancellationToken::new(),
            StreamCallbacks::new(),
        )
        .await
        .unwrap();
    assert_eq!(text, "ok");
}

#[tokio::test]
async fn test_stream_reply_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(2));
    let (callbacks, deltas, errors) = collecting_callbacks();

    let err = assert_err!(
        client
            .stream_reply(&messages(), None, &CancellationToken::new(), callbacks)
            .await
    );

    match &err {
        Error::Upstream { status, body } => {
            assert_eq!(*status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected upstream error, got {:?}", other),
    }
    let shape = Regex::new(r"^Upstream error 500: boom$").unwrap();
    assert!(shape.is_match(&err.to_string()));
    assert!(deltas.lock().unwrap().is_empty());
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stream_reply_connection_refused_is_network() {
    let client = ChatClient::new(
        ClientOptions::builder()
            .proxy_url("http://127.0.0.1:9/chat")
            .model("m")
            .build()
            .unwrap(),
    )
    .unwrap();

    let err = client
        .stream_reply(
            &messages(),
            None,
            &CancellationToken::new(),
            StreamCallbacks::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_complete_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(completion_response("Hello"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(0));
    assert_eq!(client.complete(&messages(), None).await.unwrap(), "Hello");
}

#[tokio::test]
async fn test_complete_empty_content_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion_response(""))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(0));
    let err = client.complete(&messages(), None).await.unwrap_err();
    assert!(matches!(err, Error::EmptyResponse));
}

#[tokio::test]
async fn test_complete_retries_retryable_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(completion_response("third time lucky"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(2));
    let text = client.complete(&messages(), None).await.unwrap();
    assert_eq!(text, "third time lucky");
}

#[tokio::test]
async fn test_complete_exhausted_retries_return_last_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(1));
    let err = client.complete(&messages(), None).await.unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert!(err.to_string().contains("busy"));
}

#[tokio::test]
async fn test_complete_does_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(3));
    let err = client.complete(&messages(), None).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
}

#[tokio::test]
async fn test_complete_attempt_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion_response("late").set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let retry = fast_retry(0).with_attempt_timeout(Duration::from_millis(50));
    let client = client_for(&server, retry);

    let err = client.complete(&messages(), None).await.unwrap_err();
    assert!(matches!(err, Error::Timeout), "got {:?}", err);
}

#[tokio::test]
async fn test_fallback_after_stream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(502).set_body_string("stream broke"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(completion_response("from fallback"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(0));
    let (callbacks, _, errors) = collecting_callbacks();

    let text = client
        .reply_with_fallback(&messages(), None, &CancellationToken::new(), callbacks)
        .await
        .unwrap();

    assert_eq!(text, "from fallback");
    assert_eq!(errors.lock().unwrap().len(), 1);

    // Both calls carried identical messages.
    let requests = server.received_requests().await.unwrap();
    let first: Value = requests[0].body_json().unwrap();
    let second: Value = requests[1].body_json().unwrap();
    assert_eq!(first["messages"], second["messages"]);
}

#[tokio::test]
async fn test_no_fallback_after_abort() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion_response("unused"))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(0));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client
        .reply_with_fallback(&messages(), None, &cancel, StreamCallbacks::new())
        .await
        .unwrap_err();
    assert!(err.is_abort());
}

#[tokio::test]
async fn test_spawn_stream_yields_deltas() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(&["a", "b", "c"]))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(0));
    let (handle, deltas) = client.spawn_stream(messages(), None);
    let id = handle.session_id();

    let collected: Vec<_> = deltas.collect().await;
    let texts: Vec<String> = collected
        .into_iter()
        .map(|d| {
            let d = d.unwrap();
            assert_eq!(d.session, id);
            d.text
        })
        .collect();

    assert_eq!(texts, vec!["a", "b", "c"]);
    assert_eq!(handle.finish().await.unwrap(), "abc");
}

#[tokio::test]
async fn test_spawn_stream_abort_before_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(&["late"]).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(0));
    let (handle, mut deltas) = client.spawn_stream(messages(), None);

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abort();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.finish())
        .await
        .expect("abort must end the task");
    match result {
        Err(Error::Aborted { partial }) => assert!(partial.is_empty()),
        other => panic!("expected abort, got {:?}", other),
    }
    // The channel closes without delivering anything.
    assert!(deltas.next().await.is_none());
}
