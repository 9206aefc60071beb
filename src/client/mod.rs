//! Client side of the message channel
//!
//! [`TcpClient`] connects to a single-client server, detects whether that
//! server is already busy, and offers a send-and-wait request helper on top
//! of the asynchronous message callback.

pub mod config;
pub mod engine;
pub mod state;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use engine::TcpClient;
pub use state::ClientState;
