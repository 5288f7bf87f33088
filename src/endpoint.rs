use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::TuningConfig;
use crate::error::{ProxyError, Result};
use crate::models::chat::{RawMessage, RequestOptions};
use crate::transform::build_responses_request;

/// Type alias for the streaming byte response from an upstream endpoint.
pub type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Type alias for the future returned by `stream_request`.
pub type StreamFuture = Pin<Box<dyn Future<Output = Result<ByteStream>> + Send>>;

/// Type alias for the future returned by `EndpointProvider::endpoints`.
pub type EndpointsFuture = Pin<Box<dyn Future<Output = Result<Vec<Arc<dyn ChatEndpoint>>>> + Send>>;

/// Capability surface of one streaming chat endpoint.
///
/// Metadata getters describe the endpoint; `stream_request` issues the one
/// streaming upstream call for a request. Single-shot (non-streaming)
/// completion is a separate capability, `BlockingChatEndpoint`, rather than
/// a method here that some implementors would have to stub out.
pub trait ChatEndpoint: Send + Sync {
    /// Model family, e.g. `gpt-4o`.
    fn family(&self) -> &str;

    /// Concrete model name, e.g. `gpt-4o-2024-11-20`.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Product/version string sent as the `User-Agent` header.
    fn user_agent(&self) -> String;

    fn max_input_tokens(&self) -> u64;

    fn max_output_tokens(&self) -> u64;

    fn supports_tool_calls(&self) -> bool;

    fn supports_vision(&self) -> bool;

    /// Issue the streaming upstream call.
    ///
    /// * `body` - serialized wire-schema request
    /// * `user_agent` - the `User-Agent` header value to send
    /// * `cancel` - request-scoped cancellation signal
    fn stream_request(
        &self,
        body: Bytes,
        user_agent: String,
        cancel: CancellationToken,
    ) -> StreamFuture;
}

/// Type alias for the future returned by `complete_request`.
pub type CompleteFuture = Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>;

/// Single-shot completion capability, for endpoints that support it.
pub trait BlockingChatEndpoint: Send + Sync {
    fn complete_request(&self, body: Bytes, user_agent: String) -> CompleteFuture;
}

/// External collaborator yielding the currently available endpoints.
pub trait EndpointProvider: Send + Sync {
    fn endpoints(&self) -> EndpointsFuture;
}

/// Provider over a fixed endpoint list.
pub struct StaticEndpointProvider {
    endpoints: Vec<Arc<dyn ChatEndpoint>>,
}

impl StaticEndpointProvider {
    pub fn new(endpoints: Vec<Arc<dyn ChatEndpoint>>) -> Self {
        Self { endpoints }
    }
}

impl EndpointProvider for StaticEndpointProvider {
    fn endpoints(&self) -> EndpointsFuture {
        let endpoints = self.endpoints.clone();
        Box::pin(async move { Ok(endpoints) })
    }
}

/// Pick the endpoint for a requested model: exact match on name or family,
/// falling back to the first candidate when nothing was requested or
/// nothing matched.
pub fn select_endpoint(
    endpoints: Vec<Arc<dyn ChatEndpoint>>,
    requested: Option<&str>,
) -> Result<Arc<dyn ChatEndpoint>> {
    if endpoints.is_empty() {
        return Err(ProxyError::NoEndpoint(
            "No upstream endpoints available".to_string(),
        ));
    }

    if let Some(requested) = requested
        && let Some(found) = endpoints
            .iter()
            .find(|e| e.name() == requested || e.family() == requested)
    {
        return Ok(found.clone());
    }

    Ok(endpoints[0].clone())
}

/// Static description of a Responses-speaking HTTP upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpEndpointConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub family: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u64,
    #[serde(default = "default_true")]
    pub supports_tool_calls: bool,
    #[serde(default = "default_true")]
    pub supports_vision: bool,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_max_input_tokens() -> u64 {
    128_000
}

fn default_max_output_tokens() -> u64 {
    16_384
}

fn default_true() -> bool {
    true
}

/// Concrete `ChatEndpoint` over a Responses-speaking HTTP upstream.
pub struct HttpChatEndpoint {
    client: reqwest::Client,
    config: HttpEndpointConfig,
    tuning: TuningConfig,
}

impl HttpChatEndpoint {
    pub fn new(config: HttpEndpointConfig, tuning: TuningConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            tuning,
        })
    }

    /// Typed entry point: translate a generic message history into the wire
    /// schema and open the stream.
    pub async fn stream_chat(
        &self,
        messages: &[RawMessage],
        options: &RequestOptions,
        cancel: CancellationToken,
    ) -> Result<ByteStream> {
        let request =
            build_responses_request(self.name(), messages, options, &self.tuning)?;
        let body = Bytes::from(serde_json::to_vec(&request)?);
        self.stream_request(body, self.user_agent(), cancel).await
    }

    async fn stream_request_impl(
        client: reqwest::Client,
        config: HttpEndpointConfig,
        body: Bytes,
        user_agent: String,
        cancel: CancellationToken,
    ) -> Result<ByteStream> {
        info!(
            endpoint = %config.name,
            bytes = body.len(),
            "Opening upstream stream"
        );

        let mut request = client
            .post(&config.url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .header("User-Agent", user_agent)
            .body(body);

        if let Some(api_key) = &config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
            response = request.send() => response
                .map_err(|e| ProxyError::Upstream(format!("Upstream request failed: {}", e)))?,
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProxyError::Upstream(format!(
                "Upstream returned {}: {}",
                status, detail
            )));
        }

        Ok(Box::pin(response.bytes_stream()))
    }
}

impl ChatEndpoint for HttpChatEndpoint {
    fn family(&self) -> &str {
        &self.config.family
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn user_agent(&self) -> String {
        format!("{}/{}", self.config.family, self.config.version)
    }

    fn max_input_tokens(&self) -> u64 {
        self.config.max_input_tokens
    }

    fn max_output_tokens(&self) -> u64 {
        self.config.max_output_tokens
    }

    fn supports_tool_calls(&self) -> bool {
        self.config.supports_tool_calls
    }

    fn supports_vision(&self) -> bool {
        self.config.supports_vision
    }

    fn stream_request(
        &self,
        body: Bytes,
        user_agent: String,
        cancel: CancellationToken,
    ) -> StreamFuture {
        let client = self.client.clone();
        let config = self.config.clone();
        Box::pin(Self::stream_request_impl(
            client, config, body, user_agent, cancel,
        ))
    }
}

impl BlockingChatEndpoint for HttpChatEndpoint {
    fn complete_request(&self, body: Bytes, user_agent: String) -> CompleteFuture {
        let client = self.client.clone();
        let config = self.config.clone();
        Box::pin(async move {
            let mut request = client
                .post(&config.url)
                .header("Content-Type", "application/json")
                .header("User-Agent", user_agent)
                .body(body);

            if let Some(api_key) = &config.api_key {
                request = request.bearer_auth(api_key);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ProxyError::Upstream(format!("Upstream request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let detail = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(ProxyError::Upstream(format!(
                    "Upstream returned {}: {}",
                    status, detail
                )));
            }

            response
                .bytes()
                .await
                .map_err(|e| ProxyError::Upstream(format!("Failed to read upstream body: {}", e)))
        })
    }
}
