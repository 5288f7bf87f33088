use clap::Parser;
use lm_proxy::config::Settings;
use lm_proxy::endpoint::{HttpChatEndpoint, HttpEndpointConfig, StaticEndpointProvider};
use lm_proxy::server::LanguageModelServer;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Loopback streaming proxy for the Responses API")]
struct Args {
    /// Path to a TOML settings file.
    #[arg(long)]
    config: Option<String>,

    /// Upstream Responses endpoint URL.
    #[arg(long)]
    url: String,

    /// Model family of the upstream endpoint.
    #[arg(long)]
    family: String,

    /// Concrete model name of the upstream endpoint.
    #[arg(long)]
    model: String,

    /// Upstream API key; falls back to the LM_PROXY_API_KEY variable.
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::from_env(),
    };
    settings.validate()?;

    let endpoint_config = HttpEndpointConfig {
        url: args.url,
        api_key: args.api_key.or_else(|| std::env::var("LM_PROXY_API_KEY").ok()),
        family: args.family,
        name: args.model,
        version: env!("CARGO_PKG_VERSION").to_string(),
        max_input_tokens: 128_000,
        max_output_tokens: 16_384,
        supports_tool_calls: true,
        supports_vision: true,
    };

    let endpoint = HttpChatEndpoint::new(endpoint_config, settings.tuning.clone())?;
    let provider = Arc::new(StaticEndpointProvider::new(vec![Arc::new(endpoint)]));

    let server = LanguageModelServer::new(settings, provider);
    let config = server.start().await?;

    eprintln!("Proxy ready!");
    eprintln!("  Base URL: {}", config.base_url());
    eprintln!("  Nonce:    {}", config.nonce);

    tokio::signal::ctrl_c().await?;
    server.stop().await;

    Ok(())
}
