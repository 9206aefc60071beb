use crate::server::ServerConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for [`HttpServer`](super::HttpServer)
///
/// Converts into the [`ServerConfig`] of the underlying message server, with
/// the newline as message delimiter so that every request line arrives as
/// its own message.
///
/// # Examples
///
/// ```rust
/// use tcpcom::http::HttpConfig;
/// use std::time::Duration;
///
/// let config = HttpConfig {
///     bind_addr: "127.0.0.1:8080".parse().unwrap(),
///     server_name: "RaspiServer".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.idle_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Network address to bind to
    pub bind_addr: SocketAddr,
    /// Server name reported in the `Server` response header
    pub server_name: String,
    /// Drop a client that sends no request for this long
    pub idle_timeout: Duration,
    /// Emit request-level debug traces
    pub verbose: bool,
}

impl HttpConfig {
    /// Listens on all interfaces at `port`
    pub fn new(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            ..Default::default()
        }
    }

    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            server_name: "TCPCOM".to_string(),
            idle_timeout: Duration::from_secs(5),
            verbose: false,
        }
    }
}

impl From<HttpConfig> for ServerConfig {
    fn from(config: HttpConfig) -> Self {
        ServerConfig::default()
            .with_bind_addr(config.bind_addr)
            .with_delimiter(b'\n')
            .with_idle_timeout(config.idle_timeout)
            .with_verbose(config.verbose)
    }
}
