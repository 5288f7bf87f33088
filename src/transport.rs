use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::endpoint::{ChatEndpoint, StreamFuture};
use crate::error::{ProxyError, Result};
use crate::models::chat::{CompletionResult, ProgressDelta};
use crate::streaming::{CompletionAccumulator, SseParser};

/// Transparent decorator over one selected upstream endpoint.
///
/// Capability metadata is forwarded to the wrapped endpoint unchanged; the
/// outbound `User-Agent` is rewritten by prefixing the proxy's client
/// identifier ahead of the endpoint's own product/version string. The
/// streaming path forwards every upstream chunk to the client in arrival
/// order while feeding an identical copy through the SSE parser and
/// completion accumulator.
pub struct PassThroughTransport {
    inner: Arc<dyn ChatEndpoint>,
    client_identifier: String,
}

impl PassThroughTransport {
    pub fn new(inner: Arc<dyn ChatEndpoint>, client_identifier: String) -> Self {
        Self {
            inner,
            client_identifier,
        }
    }

    /// Issue the single upstream call and pump the stream until it ends,
    /// the client goes away, or `cancel` fires.
    ///
    /// Returns the terminal completion record when the stream reached
    /// `response.completed`. The upstream response body is dropped on every
    /// exit path, including cancellation. The 200 response is committed
    /// before this runs, so upstream failures are written to the client as
    /// an `error` frame rather than an HTTP status.
    pub async fn run(
        &self,
        body: Bytes,
        client_tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
        request_id: String,
    ) -> Result<Option<CompletionResult>> {
        let mut upstream = match self
            .inner
            .stream_request(body, self.user_agent(), cancel.clone())
            .await
        {
            Ok(upstream) => upstream,
            Err(ProxyError::Cancelled) => return Err(ProxyError::Cancelled),
            Err(e) => {
                let _ = client_tx
                    .send(error_frame("upstream_error", &e.to_string(), &request_id))
                    .await;
                return Err(e);
            }
        };

        let mut parser = SseParser::new();
        let mut accumulator = CompletionAccumulator::new(request_id.clone());
        let mut result = None;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Client went away, releasing upstream stream");
                    drop(upstream);
                    return Err(ProxyError::Cancelled);
                }
                chunk = upstream.next() => chunk,
            };

            match chunk {
                Some(Ok(chunk)) => {
                    // Forwarding comes first and is never held back for
                    // parsing; the client sees the bytes exactly as they
                    // arrived.
                    if client_tx.send(chunk.clone()).await.is_err() {
                        info!("Client response closed, cancelling upstream");
                        cancel.cancel();
                        drop(upstream);
                        return Err(ProxyError::Cancelled);
                    }

                    for event in parser.feed(&chunk) {
                        let update = accumulator.process(&event);
                        for delta in &update.deltas {
                            log_delta(delta);
                        }
                        if update.result.is_some() {
                            result = update.result;
                        }
                    }
                }
                Some(Err(e)) => {
                    drop(upstream);
                    let err = ProxyError::Upstream(format!("Upstream stream failed: {}", e));
                    let _ = client_tx
                        .send(error_frame("upstream_error", &err.to_string(), &request_id))
                        .await;
                    return Err(err);
                }
                None => break,
            }
        }

        // A stream that ended without any terminal event (completion or
        // upstream error frame) is reported to the client. When the upstream
        // already sent its own `error` event the accumulator is in its
        // terminal state and nothing is appended.
        if result.is_none() && !accumulator.is_completed() {
            debug!("Upstream stream ended without a completion event");
            let _ = client_tx
                .send(error_frame(
                    "incomplete_stream",
                    "Upstream stream ended without a completion event",
                    &request_id,
                ))
                .await;
        }

        Ok(result)
    }
}

/// Proxy-origin error frame, in the same wire shape as upstream `error`
/// events, with the request id attached for correlation.
fn error_frame(code: &str, message: &str, request_id: &str) -> Bytes {
    let data = serde_json::json!({
        "code": code,
        "message": message,
        "request_id": request_id,
    });
    Bytes::from(format!("event: error\ndata: {}\n\n", data))
}

impl ChatEndpoint for PassThroughTransport {
    fn family(&self) -> &str {
        self.inner.family()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    /// Client identifier first, wrapped endpoint's product/version kept as
    /// the suffix.
    fn user_agent(&self) -> String {
        format!("{} {}", self.client_identifier, self.inner.user_agent())
    }

    fn max_input_tokens(&self) -> u64 {
        self.inner.max_input_tokens()
    }

    fn max_output_tokens(&self) -> u64 {
        self.inner.max_output_tokens()
    }

    fn supports_tool_calls(&self) -> bool {
        self.inner.supports_tool_calls()
    }

    fn supports_vision(&self) -> bool {
        self.inner.supports_vision()
    }

    fn stream_request(
        &self,
        body: Bytes,
        _user_agent: String,
        cancel: CancellationToken,
    ) -> StreamFuture {
        // The decorator always injects its own rewritten User-Agent.
        self.inner.stream_request(body, self.user_agent(), cancel)
    }
}

fn log_delta(delta: &ProgressDelta) {
    match delta {
        ProgressDelta::Text { text, .. } => trace!(len = text.len(), "Text delta"),
        ProgressDelta::ToolCallStarted { name } => debug!(tool = %name, "Tool call started"),
        ProgressDelta::ToolCallCompleted(call) => {
            debug!(tool = %call.name, call_id = %call.id, "Tool call completed")
        }
        ProgressDelta::Reasoning { id, .. } => trace!(id = %id, "Reasoning item"),
        ProgressDelta::ReasoningSummary { text } => trace!(len = text.len(), "Reasoning summary"),
        ProgressDelta::Completed { response_id } => {
            info!(response_id = ?response_id, "Stream completed")
        }
        ProgressDelta::Error { code, message } => {
            warn!(code = ?code, message = %message, "Upstream reported error event")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ByteStream;
    use crate::models::chat::FinishReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Endpoint that replays a fixed chunk script.
    struct ScriptedEndpoint {
        chunks: Vec<&'static [u8]>,
        calls: AtomicUsize,
    }

    impl ScriptedEndpoint {
        fn new(chunks: Vec<&'static [u8]>) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ChatEndpoint for ScriptedEndpoint {
        fn family(&self) -> &str {
            "gpt-test"
        }

        fn name(&self) -> &str {
            "gpt-test-1"
        }

        fn version(&self) -> &str {
            "9"
        }

        fn user_agent(&self) -> String {
            "UpstreamSdk/9".to_string()
        }

        fn max_input_tokens(&self) -> u64 {
            4096
        }

        fn max_output_tokens(&self) -> u64 {
            1024
        }

        fn supports_tool_calls(&self) -> bool {
            true
        }

        fn supports_vision(&self) -> bool {
            false
        }

        fn stream_request(
            &self,
            _body: Bytes,
            _user_agent: String,
            _cancel: CancellationToken,
        ) -> StreamFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let chunks: Vec<reqwest::Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect();
            Box::pin(async move {
                Ok(Box::pin(futures::stream::iter(chunks)) as ByteStream)
            })
        }
    }

    const SCRIPT: &[&[u8]] = &[
        b"event: response.output_text.delta\ndata: {\"delta\":\"Hi\"}\n\n",
        b"event: response.output_text.de",
        b"lta\ndata: {\"delta\":\" there\"}\n\nevent: response.completed\ndata: {\"response\":{\"id\":\"r1\",\"status\":\"completed\",\"output\":[{\"type\":\"message\",\"content\":[{\"type\":\"output_text\",\"text\":\"Hi there\"}]}]}}\n\n",
    ];

    #[tokio::test]
    async fn test_bytes_forwarded_verbatim_and_result_built() {
        let endpoint = ScriptedEndpoint::new(SCRIPT.to_vec());
        let transport =
            PassThroughTransport::new(endpoint.clone(), "LanguageModelProxy/0.1".to_string());

        let (tx, mut rx) = mpsc::channel(16);
        let result = transport
            .run(
                Bytes::from_static(b"{}"),
                tx,
                CancellationToken::new(),
                "req-1".to_string(),
            )
            .await
            .unwrap()
            .expect("terminal result");

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.message.joined_text(), "Hi there");
        assert_eq!(result.response_id.as_deref(), Some("r1"));

        // Chunks reach the client with the upstream's exact granularity.
        for expected in SCRIPT {
            let got = rx.recv().await.unwrap();
            assert_eq!(&got[..], *expected);
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_client_drop_cancels_upstream() {
        let endpoint = ScriptedEndpoint::new(SCRIPT.to_vec());
        let transport = PassThroughTransport::new(endpoint, "Proxy/1".to_string());

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let cancel = CancellationToken::new();
        let err = transport
            .run(
                Bytes::from_static(b"{}"),
                tx,
                cancel.clone(),
                "req-1".to_string(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::Cancelled));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_stream_without_completion_appends_error_frame() {
        let endpoint = ScriptedEndpoint::new(vec![
            b"event: response.output_text.delta\ndata: {\"delta\":\"partial\"}\n\n",
        ]);
        let transport = PassThroughTransport::new(endpoint, "Proxy/1".to_string());

        let (tx, mut rx) = mpsc::channel(16);
        let result = transport
            .run(
                Bytes::from_static(b"{}"),
                tx,
                CancellationToken::new(),
                "req-1".to_string(),
            )
            .await
            .unwrap();

        assert!(result.is_none());

        let first = rx.recv().await.unwrap();
        assert!(std::str::from_utf8(&first).unwrap().contains("partial"));

        let frame = rx.recv().await.unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: error\n"));
        assert!(text.contains("incomplete_stream"));
        assert!(text.contains("req-1"));
        assert!(rx.recv().await.is_none());
    }

    /// Endpoint whose upstream call fails outright.
    struct FailingEndpoint;

    impl ChatEndpoint for FailingEndpoint {
        fn family(&self) -> &str {
            "gpt-test"
        }

        fn name(&self) -> &str {
            "gpt-test-1"
        }

        fn version(&self) -> &str {
            "9"
        }

        fn user_agent(&self) -> String {
            "UpstreamSdk/9".to_string()
        }

        fn max_input_tokens(&self) -> u64 {
            4096
        }

        fn max_output_tokens(&self) -> u64 {
            1024
        }

        fn supports_tool_calls(&self) -> bool {
            true
        }

        fn supports_vision(&self) -> bool {
            false
        }

        fn stream_request(
            &self,
            _body: Bytes,
            _user_agent: String,
            _cancel: CancellationToken,
        ) -> StreamFuture {
            Box::pin(async {
                Err(ProxyError::Upstream("connection refused".to_string()))
            })
        }
    }

    #[tokio::test]
    async fn test_upstream_failure_reaches_client_as_error_frame() {
        let transport =
            PassThroughTransport::new(Arc::new(FailingEndpoint), "Proxy/1".to_string());

        let (tx, mut rx) = mpsc::channel(16);
        let err = transport
            .run(
                Bytes::from_static(b"{}"),
                tx,
                CancellationToken::new(),
                "req-9".to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Upstream(_)));

        let frame = rx.recv().await.unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: error\n"));
        assert!(text.contains("upstream_error"));
        assert!(text.contains("connection refused"));
        assert!(text.contains("req-9"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_upstream_error_event_not_duplicated() {
        let endpoint = ScriptedEndpoint::new(vec![
            b"event: error\ndata: {\"code\":\"rate_limit\",\"message\":\"slow down\"}\n\n",
        ]);
        let transport = PassThroughTransport::new(endpoint, "Proxy/1".to_string());

        let (tx, mut rx) = mpsc::channel(16);
        let result = transport
            .run(
                Bytes::from_static(b"{}"),
                tx,
                CancellationToken::new(),
                "req-1".to_string(),
            )
            .await
            .unwrap();
        assert!(result.is_none());

        // The upstream's own error frame is forwarded; nothing is appended.
        let frame = rx.recv().await.unwrap();
        assert!(std::str::from_utf8(&frame).unwrap().contains("rate_limit"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_user_agent_prefix_preserves_suffix() {
        let endpoint = ScriptedEndpoint::new(vec![]);
        let transport = PassThroughTransport::new(endpoint, "LanguageModelProxy/0.1".to_string());

        assert_eq!(transport.user_agent(), "LanguageModelProxy/0.1 UpstreamSdk/9");
        // Everything else is forwarded unchanged.
        assert_eq!(transport.family(), "gpt-test");
        assert_eq!(transport.max_input_tokens(), 4096);
        assert!(!transport.supports_vision());
    }
}
