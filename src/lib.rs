//! Configurable HTTP and WebSocket echo server for tests
//!
//! Every HTTP request is answered with a JSON description of itself. The
//! `Expect-Status`, `Expect-Headers` and `Expect-Chunked` request headers
//! shape the response; WebSocket upgrades get a frame-for-frame echo.

use thiserror::Error;

/// Error types for the echo service
#[derive(Error, Debug)]
pub enum EchoError {
    /// Socket errors (bind, accept, read, write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A request that could not be read
    #[error("Request error: {0}")]
    Request(#[from] crate::http::RequestError),

    /// An echo body that could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] body::DecodeError),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A refused WebSocket upgrade
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] websocket::HandshakeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Unexpected responses seen by the test client
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A server task that panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for the echo service
pub type Result<T> = std::result::Result<T, EchoError>;

pub mod body;
pub mod common;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod http;
pub mod security;
pub mod server;
pub mod websocket;

// Re-export main types for convenience
pub use body::EchoBody;
pub use config::{AppConfig, CliArgs, ServerConfig};
pub use dispatch::{Dispatcher, RequestKind, RequestObserver};
pub use http::{EchoRequest, HttpEchoClient};
pub use server::EchoServer;
