//! # LM Proxy
//!
//! A loopback-only streaming proxy for the Responses chat-completion API.
//!
//! ## Overview
//!
//! The server exposes a single streaming endpoint guarded by a per-instance
//! bearer nonce. Requests are forwarded to one of several pluggable
//! upstream endpoints, and the upstream SSE bytes are passed through to the
//! client unmodified while an identical copy is re-interpreted into a
//! structured completion record (text, tool calls, reasoning, usage) for
//! logging, telemetry, and stateful continuation.
//!
//! ## Modules
//!
//! - [`config`] - Runtime config, settings file loading, tuning flags
//! - [`endpoint`] - Chat endpoint capability traits and the HTTP upstream
//! - [`error`] - Error types and handling
//! - [`handler`] - The Responses request handler
//! - [`models`] - Generic chat model and the Responses wire schema
//! - [`server`] - Listener lifecycle and request routing
//! - [`streaming`] - SSE frame parser and completion accumulator
//! - [`transform`] - Protocol translation between the two representations
//! - [`transport`] - Byte-exact pass-through streaming

pub mod config;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod models;
pub mod server;
pub mod streaming;
pub mod transform;
pub mod transport;

pub use config::{ProxyConfig, Settings};
pub use error::{ProxyError, Result};
pub use server::LanguageModelServer;
