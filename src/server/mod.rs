//! Single-client TCP server
//!
//! The server accepts one client at a time, delivers its delimiter-framed
//! messages to a state-change callback and drops idle clients when an idle
//! timeout is configured.

pub mod config;
pub mod engine;
pub mod state;

pub use config::ServerConfig;
pub use engine::TcpServer;
pub use state::ServerState;
