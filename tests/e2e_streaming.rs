//! End-to-end tests: a real listener, a scripted stub upstream, and a
//! plain HTTP client driving the public surface.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use lm_proxy::config::Settings;
use lm_proxy::endpoint::{ByteStream, ChatEndpoint, StaticEndpointProvider, StreamFuture};
use lm_proxy::error::ProxyError;
use lm_proxy::server::LanguageModelServer;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SCRIPT: &[&[u8]] = &[
    b"event: response.output_text.delta\ndata: {\"delta\":\"Hi\"}\n\n",
    b"event: response.output_text.delta\ndata: {\"delta\":\" there\"}\n\n",
    b"event: response.completed\ndata: {\"response\":{\"id\":\"r1\",\"status\":\"completed\",\"output\":[{\"type\":\"message\",\"content\":[{\"type\":\"output_text\",\"text\":\"Hi there\"}]}]}}\n\n",
];

/// Stub upstream that records request bodies and replays a fixed script.
struct StubEndpoint {
    family: String,
    name: String,
    calls: AtomicUsize,
    bodies: Mutex<Vec<Bytes>>,
    /// When set, the stream hangs after the first chunk and reports its
    /// own drop through this flag.
    hang_after_first: Option<Arc<AtomicBool>>,
    /// When set, the upstream call fails outright.
    fail: bool,
}

impl StubEndpoint {
    fn new(family: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            family: family.to_string(),
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
            hang_after_first: None,
            fail: false,
        })
    }

    fn hanging(family: &str, name: &str, dropped: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            family: family.to_string(),
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
            hang_after_first: Some(dropped),
            fail: false,
        })
    }

    fn failing(family: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            family: family.to_string(),
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
            hang_after_first: None,
            fail: true,
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_body(&self) -> Option<Bytes> {
        self.bodies.lock().unwrap().last().cloned()
    }
}

/// Stream wrapper that reports being dropped.
struct GuardedStream<S> {
    inner: S,
    dropped: Arc<AtomicBool>,
}

impl<S> Drop for GuardedStream<S> {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

impl<S: Stream + Unpin> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

impl ChatEndpoint for StubEndpoint {
    fn family(&self) -> &str {
        &self.family
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1"
    }

    fn user_agent(&self) -> String {
        "StubUpstream/1".to_string()
    }

    fn max_input_tokens(&self) -> u64 {
        8192
    }

    fn max_output_tokens(&self) -> u64 {
        1024
    }

    fn supports_tool_calls(&self) -> bool {
        true
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn stream_request(
        &self,
        body: Bytes,
        _user_agent: String,
        _cancel: CancellationToken,
    ) -> StreamFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(body);

        if self.fail {
            return Box::pin(async {
                Err(ProxyError::Upstream("simulated upstream outage".to_string()))
            });
        }

        let hang = self.hang_after_first.clone();
        Box::pin(async move {
            let stream: ByteStream = match hang {
                Some(dropped) => {
                    let first = futures::stream::once(async {
                        Ok(Bytes::from_static(SCRIPT[0]))
                    });
                    Box::pin(GuardedStream {
                        inner: Box::pin(first.chain(futures::stream::pending())),
                        dropped,
                    })
                }
                None => {
                    let chunks: Vec<reqwest::Result<Bytes>> =
                        SCRIPT.iter().map(|c| Ok(Bytes::from_static(c))).collect();
                    Box::pin(futures::stream::iter(chunks))
                }
            };
            Ok(stream)
        })
    }
}

async fn start_server(endpoints: Vec<Arc<dyn ChatEndpoint>>) -> (LanguageModelServer, String, String) {
    let provider = Arc::new(StaticEndpointProvider::new(endpoints));
    let server = LanguageModelServer::new(Settings::default(), provider);
    let config = server.start().await.unwrap();
    (server, config.base_url(), config.nonce)
}

#[tokio::test]
async fn test_happy_path_streams_verbatim() {
    let stub = StubEndpoint::new("gpt-x", "gpt-x-1");
    let (server, base, nonce) = start_server(vec![stub.clone()]).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/responses", base))
        .bearer_auth(&nonce)
        .json(&serde_json::json!({"model":"gpt-x","input":"hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");

    let body = response.bytes().await.unwrap();
    let expected: Vec<u8> = SCRIPT.concat();
    assert_eq!(&body[..], &expected[..]);

    assert_eq!(stub.call_count(), 1);
    server.stop().await;
}

#[tokio::test]
async fn test_wrong_nonce_never_reaches_upstream() {
    let stub = StubEndpoint::new("gpt-x", "gpt-x-1");
    let (server, base, _nonce) = start_server(vec![stub.clone()]).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/responses", base))
        .bearer_auth("not-the-nonce")
        .json(&serde_json::json!({"model":"gpt-x","input":"hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid authentication");
    assert_eq!(stub.call_count(), 0);

    // Missing header entirely.
    let response = reqwest::Client::new()
        .post(format!("{}/v1/responses", base))
        .json(&serde_json::json!({"input":"hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(stub.call_count(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_web_search_tools_filtered_before_forwarding() {
    let stub = StubEndpoint::new("gpt-x", "gpt-x-1");
    let (server, base, nonce) = start_server(vec![stub.clone()]).await;

    let response = reqwest::Client::new()
        .post(format!("{}/responses", base))
        .bearer_auth(&nonce)
        .json(&serde_json::json!({
            "model": "gpt-x",
            "input": "hi",
            "tools": [
                {"type": "web_search_preview"},
                {"type": "function", "name": "get_weather", "parameters": {}}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();

    let forwarded: serde_json::Value =
        serde_json::from_slice(&stub.last_body().unwrap()).unwrap();
    let tools = forwarded["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["type"], "function");

    server.stop().await;
}

#[tokio::test]
async fn test_routing_surface() {
    let stub = StubEndpoint::new("gpt-x", "gpt-x-1");
    let (server, base, nonce) = start_server(vec![stub.clone()]).await;
    let client = reqwest::Client::new();

    // Liveness.
    let response = client.get(format!("{}/", base)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.text().await.unwrap(),
        "Hello from LanguageModelServer"
    );

    // CORS preflight succeeds on any path.
    let response = client
        .request(reqwest::Method::OPTIONS, format!("{}/v1/responses", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.bytes().await.unwrap().is_empty());

    // The doubled-slash variant is accepted.
    let response = client
        .post(format!("{}//responses", base))
        .bearer_auth(&nonce)
        .json(&serde_json::json!({"input":"hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();

    // Everything else is a JSON 404.
    let response = client
        .get(format!("{}/v1/other", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Not found");

    server.stop().await;
}

#[tokio::test]
async fn test_no_endpoints_is_404() {
    let (server, base, nonce) = start_server(vec![]).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/responses", base))
        .bearer_auth(&nonce)
        .json(&serde_json::json!({"model":"gpt-x","input":"hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "No models available");

    server.stop().await;
}

#[tokio::test]
async fn test_model_selection_prefers_exact_match() {
    let a = StubEndpoint::new("gpt-a", "gpt-a-1");
    let b = StubEndpoint::new("gpt-b", "gpt-b-1");
    let (server, base, nonce) =
        start_server(vec![a.clone() as Arc<dyn ChatEndpoint>, b.clone()]).await;

    let client = reqwest::Client::new();

    // Family match picks the second endpoint.
    let response = client
        .post(format!("{}/v1/responses", base))
        .bearer_auth(&nonce)
        .json(&serde_json::json!({"model":"gpt-b","input":"hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();
    assert_eq!(a.call_count(), 0);
    assert_eq!(b.call_count(), 1);

    // No model requested falls back to the first.
    let response = client
        .post(format!("{}/v1/responses", base))
        .bearer_auth(&nonce)
        .json(&serde_json::json!({"input":"hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();
    assert_eq!(a.call_count(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_body_is_500() {
    let stub = StubEndpoint::new("gpt-x", "gpt-x-1");
    let (server, base, nonce) = start_server(vec![stub.clone()]).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/responses", base))
        .bearer_auth(&nonce)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body.get("error").is_some());
    assert!(body.get("details").is_some());
    assert_eq!(stub.call_count(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_upstream_failure_streams_error_event() {
    let stub = StubEndpoint::failing("gpt-x", "gpt-x-1");
    let (server, base, nonce) = start_server(vec![stub.clone()]).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/responses", base))
        .bearer_auth(&nonce)
        .json(&serde_json::json!({"model":"gpt-x","input":"hi"}))
        .send()
        .await
        .unwrap();

    // The status line is committed before the upstream call, so the failure
    // arrives as an error frame on the stream, not as an HTTP status.
    assert_eq!(response.status(), 200);
    let body = String::from_utf8(response.bytes().await.unwrap().to_vec()).unwrap();
    assert!(body.starts_with("event: error\n"), "body: {:?}", body);
    assert!(body.contains("upstream_error"));
    assert!(body.contains("simulated upstream outage"));
    assert!(body.contains("request_id"));
    assert_eq!(stub.call_count(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_releases_upstream() {
    let dropped = Arc::new(AtomicBool::new(false));
    let stub = StubEndpoint::hanging("gpt-x", "gpt-x-1", dropped.clone());
    let (server, base, nonce) = start_server(vec![stub.clone()]).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/responses", base))
        .bearer_auth(&nonce)
        .json(&serde_json::json!({"model":"gpt-x","input":"hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Abandon the response mid-stream.
    drop(response);

    // The transport should notice and drop the upstream body.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !dropped.load(Ordering::SeqCst) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(dropped.load(Ordering::SeqCst), "upstream body never released");
    assert_eq!(stub.call_count(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_is_reentrant() {
    let stub = StubEndpoint::new("gpt-x", "gpt-x-1");
    let provider = Arc::new(StaticEndpointProvider::new(vec![
        stub as Arc<dyn ChatEndpoint>,
    ]));
    let server = LanguageModelServer::new(Settings::default(), provider);

    let first = server.start().await.unwrap();
    let second = server.start().await.unwrap();
    assert_eq!(first.port, second.port);
    assert_eq!(first.nonce, second.nonce);

    server.stop().await;
    server.stop().await;
    assert!(server.config().await.is_err());
}
