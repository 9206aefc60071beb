use crate::framing::DEFAULT_MAX_LENGTH;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for [`TcpServer`](super::TcpServer)
///
/// # Examples
///
/// ```
/// use tcpcom::server::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::new(8080)
///     .with_timeout_secs(30)
///     .with_delimiter(b'\n');
///
/// assert_eq!(config.bind_addr.port(), 8080);
/// assert_eq!(config.idle_timeout, Duration::from_secs(30));
/// ```
///
/// Non-positive timeouts disable the idle watchdog:
///
/// ```
/// use tcpcom::server::ServerConfig;
///
/// let config = ServerConfig::new(8080).with_timeout_secs(-1);
/// assert!(config.idle_timeout.is_zero());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Byte terminating every message on the wire
    pub delimiter: u8,
    /// Disconnect a client that sends nothing for this long (zero disables)
    pub idle_timeout: Duration,
    /// Give up on a client that does not take a write within this long (zero disables)
    pub write_timeout: Duration,
    /// Buffer size for reading data
    pub buffer_size: usize,
    /// Largest message that may be buffered before the connection is dropped
    pub max_message_size: usize,
    /// Emit connection-level debug traces
    pub verbose: bool,
}

impl ServerConfig {
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

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the idle timeout in whole seconds; zero or negative disables it
    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.idle_timeout = if secs <= 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(secs as u64)
        };
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            delimiter: 0,
            idle_timeout: Duration::ZERO,
            write_timeout: Duration::from_secs(30),
            buffer_size: 4096,
            max_message_size: DEFAULT_MAX_LENGTH,
            verbose: false,
        }
    }
}
