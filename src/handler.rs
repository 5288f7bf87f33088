use axum::{
    body::Body,
    http::{HeaderMap, Response, StatusCode, header},
};
use bytes::Bytes;
use futures::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::config::{ProxyConfig, Settings};
use crate::endpoint::{EndpointProvider, select_endpoint};
use crate::error::ProxyError;
use crate::models::chat::{Notice, NoticeKind};
use crate::models::responses::{ClientRequest, WEB_SEARCH_TOOL_PREFIX};
use crate::transform::messages_from_wire;
use crate::transport::PassThroughTransport;

/// Shared state handed to every request task. Immutable for the lifetime
/// of the server; requests share nothing else.
pub struct AppState {
    pub config: ProxyConfig,
    pub settings: Settings,
    pub provider: Arc<dyn EndpointProvider>,
}

/// Handle `POST` to an accepted Responses path. The body has already been
/// buffered in full by the router.
pub async fn handle_responses(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    // Authentication comes first; a bad nonce never reaches the upstream.
    if !check_auth(&headers, &state.config.nonce) {
        warn!("Rejected request with missing or invalid bearer nonce");
        return json_error(StatusCode::UNAUTHORIZED, "Invalid authentication", None);
    }

    let mut request: ClientRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to parse request body: {}", e);
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Malformed request body",
                Some(&e.to_string()),
            );
        }
    };

    for notice in filter_unsupported_tools(&mut request) {
        warn!(kind = ?notice.kind, "{}", notice.message);
    }

    let user_initiated = request.is_user_initiated();
    info!(
        model = request.model.as_deref().unwrap_or("<unspecified>"),
        user_initiated, "Incoming completion request"
    );
    log_request_messages(&request);

    let endpoints = match state.provider.endpoints().await {
        Ok(endpoints) => endpoints,
        Err(e) => {
            error!("Endpoint provider failed: {}", e);
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Endpoint provider failed",
                Some(&e.to_string()),
            );
        }
    };

    let selected = match select_endpoint(endpoints, request.model.as_deref()) {
        Ok(endpoint) => endpoint,
        Err(ProxyError::NoEndpoint(message)) => {
            warn!("{}", message);
            return json_error(StatusCode::NOT_FOUND, "No models available", None);
        }
        Err(e) => {
            error!("Endpoint selection failed: {}", e);
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Endpoint selection failed",
                Some(&e.to_string()),
            );
        }
    };
    info!(endpoint = selected.name(), "Selected upstream endpoint");

    let forward_body = match serde_json::to_vec(&request) {
        Ok(b) => Bytes::from(b),
        Err(e) => {
            error!("Failed to re-serialize request: {}", e);
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Serialization failed",
                Some(&e.to_string()),
            );
        }
    };

    let transport =
        PassThroughTransport::new(selected, state.settings.client_identifier.clone());
    let request_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel::<Bytes>(32);

    // Client-socket closure drops the response body stream, which drops the
    // guard and fires the cancellation signal.
    let client_stream = ClientStream {
        rx,
        _guard: cancel.clone().drop_guard(),
    };

    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        // The status line is committed once streaming starts; failures from
        // here on are logged only.
        match transport.run(forward_body, tx, task_cancel, request_id.clone()).await {
            Ok(Some(result)) => info!(
                request_id = %request_id,
                finish_reason = ?result.finish_reason,
                prompt_tokens = result.usage.prompt_tokens,
                completion_tokens = result.usage.completion_tokens,
                cached_tokens = result.usage.cached_tokens,
                reasoning_tokens = result.usage.reasoning_tokens,
                "Completion finished"
            ),
            Ok(None) => warn!(request_id = %request_id, "Stream ended without completion event"),
            Err(ProxyError::Cancelled) => {
                info!(request_id = %request_id, "Request cancelled by client")
            }
            Err(e) => error!(request_id = %request_id, "Streaming failed: {}", e),
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(client_stream))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Compare the bearer token against the server nonce.
pub fn check_auth(headers: &HeaderMap, nonce: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == nonce)
}

/// Drop tools the upstream cannot execute through this proxy. Never fails
/// the request; each dropped tool produces a warning notice.
pub fn filter_unsupported_tools(request: &mut ClientRequest) -> Vec<Notice> {
    let Some(tools) = &mut request.tools else {
        return Vec::new();
    };

    let mut notices = Vec::new();
    tools.retain(|tool| {
        if tool.kind.starts_with(WEB_SEARCH_TOOL_PREFIX) {
            notices.push(Notice {
                kind: NoticeKind::UnsupportedTool,
                message: format!("Dropped unsupported tool '{}'", tool.kind),
            });
            false
        } else {
            true
        }
    });

    notices
}

/// Best-effort human-readable rendering of the request for the logs.
fn log_request_messages(request: &ClientRequest) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let Ok(wire) = serde_json::to_value(request) else {
        return;
    };

    for message in messages_from_wire(&wire) {
        let calls = message
            .tool_calls
            .as_ref()
            .map(|c| c.len())
            .unwrap_or_default();
        debug!(
            role = ?message.role,
            tool_calls = calls,
            text = %message.joined_text(),
            "Request message"
        );
    }
}

pub(crate) fn json_error(
    status: StatusCode,
    message: &str,
    details: Option<&str>,
) -> Response<Body> {
    let body = match details {
        Some(details) => json!({"error": message, "details": details}),
        None => json!({"error": message}),
    };

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Client-facing byte stream. Dropping it (client disconnect) releases the
/// guard, firing the request's cancellation token.
struct ClientStream {
    rx: mpsc::Receiver<Bytes>,
    _guard: DropGuard,
}

impl Stream for ClientStream {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx).map(|opt| opt.map(Ok))
    }
}
