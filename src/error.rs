use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid authentication")]
    Auth,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No models available: {0}")]
    NoEndpoint(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
