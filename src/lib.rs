//! Delimiter-framed text messaging over TCP
//!
//! A [`TcpServer`] serves exactly one client at a time and reports everything
//! it observes through a state-change callback. A [`TcpClient`] connects to
//! it, detects a server that is already busy, and can wait for the reply to
//! a message. [`HttpServer`] layers a minimal GET responder on the server.

use thiserror::Error;

/// Error types for the tcpcom library
#[derive(Error, Debug)]
pub enum TcpComError {
    /// Socket-level errors (bind, connect, read, write)
    #[error("TCP error: {0}")]
    Tcp(#[from] std::io::Error),

    /// Configuration or usage errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// A connection's writer or reader is gone
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server could not be reached
    #[error("Connection to {0} failed")]
    ConnectionFailed(String),

    /// The server accepted and immediately closed the connection
    #[error("Server {0} is occupied by another client")]
    ServerOccupied(String),

    /// Malformed HTTP data
    #[error("HTTP error: {0}")]
    Http(String),

    /// Unsupported operation errors
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type for the tcpcom library
pub type Result<T> = std::result::Result<T, TcpComError>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod common;
pub mod client;
pub mod framing;
pub mod http;
pub mod network;
pub mod server;
pub mod watchdog;

// Re-export main types for convenience
pub use client::{ClientConfig, ClientState, TcpClient};
pub use framing::DelimiterCodec;
pub use http::{HttpConfig, HttpRequest, HttpResponse, HttpServer};
pub use server::{ServerConfig, ServerState, TcpServer};
pub use watchdog::Watchdog;
