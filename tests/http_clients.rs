//! OpenAI-compatible clients against a local axum mock server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use paper_chat::chat::{ChatModel, OpenAiChatClient};
use paper_chat::config::{ClientConfig, RagOptions};
use paper_chat::embedding::{EmbeddingModel, OpenAiEmbeddingClient};
use paper_chat::ErrorKind;
use paper_chat_core::models::Message;
use serde_json::{json, Value};

#[derive(Clone, Copy)]
enum Mode {
    Reply,
    NullContent,
    Status(u16),
    /// Fail with 503 this many times, then reply.
    Flaky(usize),
    Slow(Duration),
    /// Embeddings: reject any request with more than one input.
    RejectBatches(u16),
    /// Embeddings: return one vector fewer than asked for.
    Truncate,
}

struct Recorded {
    auth: Option<String>,
    body: Value,
}

struct Mock {
    mode: Mode,
    requests: Mutex<Vec<Recorded>>,
    failures: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Mock {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            requests: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn record(&self, headers: &HeaderMap, body: &Value) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push(Recorded {
            auth,
            body: body.clone(),
        });
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Returns an error response if this attempt should fail.
    async fn common_failure(&self) -> Option<Response> {
        match self.mode {
            Mode::Status(code) => Some(error_response(code)),
            Mode::Flaky(times) => {
                if self.failures.fetch_add(1, Ordering::SeqCst) < times {
                    Some(error_response(503))
                } else {
                    None
                }
            }
            Mode::Slow(delay) => {
                tokio::time::sleep(delay).await;
                None
            }
            _ => None,
        }
    }
}

fn error_response(code: u16) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"error": {"message": format!("mock failure {}", code)}}))).into_response()
}

/// Deterministic fake vector: text length and a constant.
fn fake_vector(text: &str) -> Value {
    json!([text.len() as f64, 1.0])
}

async fn chat_handler(
    State(mock): State<Arc<Mock>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record(&headers, &body);
    if let Some(response) = mock.common_failure().await {
        return response;
    }
    let content = match mock.mode {
        Mode::NullContent => Value::Null,
        _ => {
            let last = body["messages"]
                .as_array()
                .and_then(|m| m.last())
                .and_then(|m| m["content"].as_str())
                .unwrap_or_default();
            Value::String(format!("echo: {}", last))
        }
    };
    Json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
    }))
    .into_response()
}

async fn embeddings_handler(
    State(mock): State<Arc<Mock>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record(&headers, &body);
    let now = mock.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    mock.max_in_flight.fetch_max(now, Ordering::SeqCst);
    let response = embeddings_response(&mock, &body).await;
    mock.in_flight.fetch_sub(1, Ordering::SeqCst);
    response
}

async fn embeddings_response(mock: &Mock, body: &Value) -> Response {
    if let Some(response) = mock.common_failure().await {
        return response;
    }
    let inputs: Vec<String> = body["input"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    match mock.mode {
        Mode::RejectBatches(code) if inputs.len() > 1 => return error_response(code),
        Mode::RejectBatches(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        _ => {}
    }

    let mut data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, text)| json!({"object": "embedding", "index": i, "embedding": fake_vector(text)}))
        .collect();
    if matches!(mock.mode, Mode::Truncate) && inputs.len() > 1 {
        data.pop();
    }
    // Servers may return items out of order; `index` is authoritative.
    data.reverse();
    Json(json!({"object": "list", "data": data})).into_response()
}

/// Serve the mock on an ephemeral port and return its `/v1` base URL.
async fn spawn_mock(mock: Arc<Mock>) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_handler))
        .route("/v1/embeddings", post(embeddings_handler))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ============ Chat ============

#[tokio::test]
async fn chat_sends_bearer_token_and_parses_content() {
    let mock = Mock::new(Mode::Reply);
    let base = spawn_mock(Arc::clone(&mock)).await;

    let mut cfg = ClientConfig::new(base, "llama3.1");
    cfg.api_key = Some("sk-test".into());
    let client = OpenAiChatClient::new(&cfg, &RagOptions::default()).unwrap();

    let answer = client
        .invoke(&[Message::system("be brief"), Message::human("hello")])
        .await
        .unwrap();
    assert_eq!(answer, "echo: hello");

    let requests = mock.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(requests[0].body["model"], "llama3.1");
    assert_eq!(requests[0].body["messages"][0]["role"], "system");
    assert_eq!(requests[0].body["messages"][1]["role"], "user");
}

#[tokio::test]
async fn chat_omits_authorization_without_key() {
    let mock = Mock::new(Mode::Reply);
    let base = spawn_mock(Arc::clone(&mock)).await;

    let mut cfg = ClientConfig::new(base.clone(), "m");
    let client = OpenAiChatClient::new(&cfg, &RagOptions::default()).unwrap();
    client.invoke(&[Message::human("a")]).await.unwrap();

    cfg.api_key = Some(String::new());
    let client = OpenAiChatClient::new(&cfg, &RagOptions::default()).unwrap();
    client.invoke(&[Message::human("b")]).await.unwrap();

    let requests = mock.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.auth.is_none()));
}

#[tokio::test]
async fn chat_null_content_is_empty_completion() {
    let mock = Mock::new(Mode::NullContent);
    let base = spawn_mock(mock).await;
    let client = OpenAiChatClient::new(&ClientConfig::new(base, "m"), &RagOptions::default()).unwrap();

    let err = client.invoke(&[Message::human("q")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyCompletion);
}

#[tokio::test]
async fn chat_server_error_is_upstream_with_status() {
    let mock = Mock::new(Mode::Status(500));
    let base = spawn_mock(Arc::clone(&mock)).await;
    let client = OpenAiChatClient::new(&ClientConfig::new(base, "m"), &RagOptions::default()).unwrap();

    let err = client.invoke(&[Message::human("q")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("mock failure 500"));
    // No retries unless configured.
    assert_eq!(mock.request_count(), 1);
}

#[tokio::test]
async fn chat_client_error_is_not_retried() {
    let mock = Mock::new(Mode::Status(401));
    let base = spawn_mock(Arc::clone(&mock)).await;
    let options = RagOptions {
        max_retries: 2,
        ..RagOptions::default()
    };
    let client = OpenAiChatClient::new(&ClientConfig::new(base, "m"), &options).unwrap();

    let err = client.invoke(&[Message::human("q")]).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(mock.request_count(), 1);
}

#[tokio::test]
async fn chat_retries_transient_failures_when_configured() {
    let mock = Mock::new(Mode::Flaky(1));
    let base = spawn_mock(Arc::clone(&mock)).await;
    let options = RagOptions {
        max_retries: 1,
        ..RagOptions::default()
    };
    let client = OpenAiChatClient::new(&ClientConfig::new(base, "m"), &options).unwrap();

    let answer = client.invoke(&[Message::human("again")]).await.unwrap();
    assert_eq!(answer, "echo: again");
    assert_eq!(mock.request_count(), 2);
}

#[tokio::test]
async fn chat_timeout_is_upstream() {
    let mock = Mock::new(Mode::Slow(Duration::from_secs(5)));
    let base = spawn_mock(mock).await;
    let options = RagOptions {
        chat_timeout_secs: 1,
        ..RagOptions::default()
    };
    let client = OpenAiChatClient::new(&ClientConfig::new(base, "m"), &options).unwrap();

    let err = client.invoke(&[Message::human("q")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn unreachable_server_is_upstream() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let cfg = ClientConfig::new(format!("http://{}/v1", addr), "m");
    let client = OpenAiChatClient::new(&cfg, &RagOptions::default()).unwrap();
    let err = client.invoke(&[Message::human("q")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
}

// ============ Embeddings ============

#[tokio::test]
async fn embeddings_batch_respects_index_order() {
    let mock = Mock::new(Mode::Reply);
    let base = spawn_mock(Arc::clone(&mock)).await;
    let mut cfg = ClientConfig::new(base, "nomic-embed-text");
    cfg.api_key = Some("sk-embed".into());
    let client = OpenAiEmbeddingClient::new(&cfg, &RagOptions::default()).unwrap();

    let vectors = client.embed_batch(&texts(&["a", "bbb", "cc"])).await.unwrap();
    assert_eq!(vectors, vec![vec![1.0, 1.0], vec![3.0, 1.0], vec![2.0, 1.0]]);

    let requests = mock.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].auth.as_deref(), Some("Bearer sk-embed"));
    assert_eq!(requests[0].body["model"], "nomic-embed-text");
    assert_eq!(requests[0].body["input"].as_array().map(|a| a.len()), Some(3));
}

#[tokio::test]
async fn embeddings_split_by_batch_size() {
    let mock = Mock::new(Mode::Reply);
    let base = spawn_mock(Arc::clone(&mock)).await;
    let options = RagOptions {
        embedding_batch_size: 2,
        ..RagOptions::default()
    };
    let client = OpenAiEmbeddingClient::new(&ClientConfig::new(base, "m"), &options).unwrap();

    let vectors = client
        .embed_batch(&texts(&["a", "bb", "ccc", "dddd", "eeeee"]))
        .await
        .unwrap();
    let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(mock.request_count(), 3);
}

#[tokio::test]
async fn rejected_batch_falls_back_to_single_requests() {
    let mock = Mock::new(Mode::RejectBatches(400));
    let base = spawn_mock(Arc::clone(&mock)).await;
    let client = OpenAiEmbeddingClient::new(&ClientConfig::new(base, "m"), &RagOptions::default()).unwrap();

    let input: Vec<String> = (1..=10).map(|n| "x".repeat(n)).collect();
    let vectors = client.embed_batch(&input).await.unwrap();

    let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    let expected: Vec<f32> = (1..=10).map(|n| n as f32).collect();
    assert_eq!(lengths, expected);
    // One rejected batch plus one request per text.
    assert_eq!(mock.request_count(), 11);
    assert!(mock.max_in_flight.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn fallback_concurrency_is_capped() {
    let mock = Mock::new(Mode::RejectBatches(422));
    let base = spawn_mock(Arc::clone(&mock)).await;
    let options = RagOptions {
        embedding_concurrency: 64,
        ..RagOptions::default()
    };
    let client = OpenAiEmbeddingClient::new(&ClientConfig::new(base, "m"), &options).unwrap();

    let input: Vec<String> = (1..=12).map(|n| "y".repeat(n)).collect();
    client.embed_batch(&input).await.unwrap();
    assert!(mock.max_in_flight.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn count_mismatch_falls_back_to_single_requests() {
    let mock = Mock::new(Mode::Truncate);
    let base = spawn_mock(Arc::clone(&mock)).await;
    let client = OpenAiEmbeddingClient::new(&ClientConfig::new(base, "m"), &RagOptions::default()).unwrap();

    let vectors = client.embed_batch(&texts(&["one", "three"])).await.unwrap();
    assert_eq!(vectors, vec![vec![3.0, 1.0], vec![5.0, 1.0]]);
    assert_eq!(mock.request_count(), 3);
}

#[tokio::test]
async fn auth_failure_on_batch_is_not_a_fallback() {
    let mock = Mock::new(Mode::Status(401));
    let base = spawn_mock(Arc::clone(&mock)).await;
    let client = OpenAiEmbeddingClient::new(&ClientConfig::new(base, "m"), &RagOptions::default()).unwrap();

    let err = client.embed_batch(&texts(&["a", "b"])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(err.status(), Some(401));
    assert_eq!(mock.request_count(), 1);
}

#[tokio::test]
async fn embed_one_returns_single_vector() {
    let mock = Mock::new(Mode::Reply);
    let base = spawn_mock(mock).await;
    let client = OpenAiEmbeddingClient::new(&ClientConfig::new(base, "m"), &RagOptions::default()).unwrap();

    let vector = client.embed_one("query").await.unwrap();
    assert_eq!(vector, vec![5.0, 1.0]);
}
