use crate::error::{ProxyError, Result};
use serde::Deserialize;
use std::env;
use std::fs;

/// Runtime configuration of a started server.
///
/// Immutable once `start()` succeeds: the port is whatever the OS assigned
/// to the loopback listener and the nonce is generated exactly once per
/// server instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub nonce: String,
}

impl ProxyConfig {
    /// Base URL clients should use to reach this server.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Generate a fresh, unguessable bearer nonce.
pub fn generate_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Static settings loaded before the server starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// POST paths dispatched to the Responses handler. The double-slash
    /// variant tolerates clients that join a trailing-slash base URL with
    /// an absolute endpoint path.
    pub accepted_paths: Vec<String>,

    /// Identifier prefixed onto the outbound `User-Agent` header.
    pub client_identifier: String,

    pub tuning: TuningConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            accepted_paths: vec![
                "/v1/responses".to_string(),
                "/responses".to_string(),
                "//responses".to_string(),
            ],
            client_identifier: format!("LanguageModelProxy/{}", env!("CARGO_PKG_VERSION")),
            tuning: TuningConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("Failed to read config file: {}", e)))?;

        let mut settings: Settings = toml::from_str(&contents)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config file: {}", e)))?;

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Load settings from environment variables only.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        settings.apply_env_overrides();
        settings
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(effort) = env::var("LM_PROXY_REASONING_EFFORT") {
            self.tuning.reasoning_effort = effort;
        }
        if let Ok(summary) = env::var("LM_PROXY_REASONING_SUMMARY") {
            self.tuning.reasoning_summary = summary;
        }
        if let Ok(verbosity) = env::var("LM_PROXY_VERBOSITY") {
            self.tuning.verbosity = verbosity;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.accepted_paths.is_empty() {
            return Err(ProxyError::Config(
                "At least one accepted path is required".to_string(),
            ));
        }

        for path in &self.accepted_paths {
            if !path.starts_with('/') {
                return Err(ProxyError::Config(format!(
                    "Accepted path must start with '/': {}",
                    path
                )));
            }
        }

        if self.client_identifier.is_empty() {
            return Err(ProxyError::Config(
                "Client identifier is empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Reasoning/verbosity flags resolved from configuration or experiments.
///
/// The string value `"default"` is the off sentinel: a field resolved to it
/// is omitted from the outbound request body entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub reasoning_effort: String,
    pub reasoning_summary: String,
    pub verbosity: String,
    /// Truncation mode sent with every request.
    pub truncation: String,
}

pub const DEFAULT_SENTINEL: &str = "default";

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            reasoning_effort: DEFAULT_SENTINEL.to_string(),
            reasoning_summary: DEFAULT_SENTINEL.to_string(),
            verbosity: DEFAULT_SENTINEL.to_string(),
            truncation: "auto".to_string(),
        }
    }
}

impl TuningConfig {
    fn resolve(value: &str) -> Option<String> {
        if value.is_empty() || value == DEFAULT_SENTINEL {
            None
        } else {
            Some(value.to_string())
        }
    }

    pub fn reasoning_effort(&self) -> Option<String> {
        Self::resolve(&self.reasoning_effort)
    }

    pub fn reasoning_summary(&self) -> Option<String> {
        Self::resolve(&self.reasoning_summary)
    }

    pub fn verbosity(&self) -> Option<String> {
        Self::resolve(&self.verbosity)
    }
}
