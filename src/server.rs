use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{Method, Response, StatusCode, header},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{ProxyConfig, Settings, generate_nonce};
use crate::endpoint::EndpointProvider;
use crate::error::{ProxyError, Result};
use crate::handler::{AppState, handle_responses, json_error};

/// Liveness response for `GET /`.
const HELLO: &str = "Hello from LanguageModelServer";

/// Loopback-only HTTP server exposing the streaming Responses endpoint.
///
/// Owns the listener socket from `start()` until `stop()`. The bound port
/// is OS-assigned and the bearer nonce is generated once per instance;
/// both are immutable afterwards.
pub struct LanguageModelServer {
    settings: Settings,
    provider: Arc<dyn EndpointProvider>,
    running: Mutex<Option<Running>>,
}

struct Running {
    config: ProxyConfig,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl LanguageModelServer {
    pub fn new(settings: Settings, provider: Arc<dyn EndpointProvider>) -> Self {
        Self {
            settings,
            provider,
            running: Mutex::new(None),
        }
    }

    /// Bind the loopback listener and begin serving. Idempotent: a second
    /// call returns the existing configuration.
    pub async fn start(&self) -> Result<ProxyConfig> {
        let mut running = self.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Ok(running.config.clone());
        }

        self.settings.validate()?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let config = ProxyConfig {
            port,
            nonce: generate_nonce(),
        };

        let state = Arc::new(AppState {
            config: config.clone(),
            settings: self.settings.clone(),
            provider: self.provider.clone(),
        });

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = router(state);

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(e) = serve.await {
                error!("Server task failed: {}", e);
            }
        });

        info!(port, "Language model server listening on loopback");

        *running = Some(Running {
            config: config.clone(),
            shutdown,
            task,
        });

        Ok(config)
    }

    /// Close the listener. Safe to call repeatedly and from disposal paths.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.shutdown.cancel();
        if running.task.await.is_err() {
            error!("Server task panicked during shutdown");
        }
        info!("Language model server stopped");
    }

    /// Immutable snapshot of the running configuration, if started.
    pub async fn config(&self) -> Result<ProxyConfig> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.config.clone())
            .ok_or_else(|| ProxyError::Internal("Server not started".to_string()))
    }
}

/// Build the request router. Routing is by method plus path against the
/// configured accepted-path set, so quirky variants like `//responses`
/// (trailing-slash base URL joined with an absolute path) work without
/// special-casing in the route table.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(route_request).with_state(state)
}

async fn route_request(State(state): State<Arc<AppState>>, request: Request) -> Response<Body> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // CORS preflight, for any path.
    if method == Method::OPTIONS {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
            .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "*")
            .body(Body::empty())
            .unwrap_or_else(|_| Response::new(Body::empty()));
    }

    if method == Method::GET && path == "/" {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(HELLO))
            .unwrap_or_else(|_| Response::new(Body::empty()));
    }

    if method == Method::POST && state.settings.accepted_paths.contains(&path) {
        let (parts, body) = request.into_parts();

        // The full body is buffered before parsing. No size cap is imposed
        // here; loopback-only exposure is the current mitigation.
        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to read request body: {}", e);
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to read request body",
                    Some(&e.to_string()),
                );
            }
        };

        return handle_responses(state, parts.headers, body).await;
    }

    json_error(StatusCode::NOT_FOUND, "Not found", None)
}
