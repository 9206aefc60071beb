use crate::framing::DEFAULT_MAX_LENGTH;
use std::time::Duration;

/// Configuration for [`TcpClient`](super::TcpClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Byte terminating every message on the wire
    pub delimiter: u8,
    /// Connection timeout used when `connect` is given zero (zero waits for the OS)
    pub connect_timeout: Duration,
    /// How long to watch for the server closing a freshly opened connection
    pub refusal_probe: Duration,
    /// Drop the link when the server does not take a write within this long (zero disables)
    pub write_timeout: Duration,
    /// Buffer size for reading data
    pub buffer_size: usize,
    /// Largest message that may be buffered before the connection is dropped
    pub max_message_size: usize,
    /// Emit connection-level debug traces
    pub verbose: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            delimiter: 0,
            connect_timeout: Duration::ZERO,
            refusal_probe: Duration::from_secs(2),
            write_timeout: Duration::from_secs(30),
            buffer_size: 4096,
            max_message_size: DEFAULT_MAX_LENGTH,
            verbose: false,
        }
    }
}

/// Builder for client configuration
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn refusal_probe(mut self, window: Duration) -> Self {
        self.config.refusal_probe = window;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.delimiter, 0);
        assert_eq!(config.refusal_probe, Duration::from_secs(2));
        assert!(config.connect_timeout.is_zero());
        assert_eq!(config.write_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfigBuilder::new()
            .delimiter(b'\n')
            .connect_timeout(Duration::from_secs(5))
            .refusal_probe(Duration::from_millis(300))
            .write_timeout(Duration::from_secs(1))
            .buffer_size(2048)
            .max_message_size(1024 * 1024)
            .verbose(true)
            .build();

        assert_eq!(config.delimiter, b'\n');
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.refusal_probe, Duration::from_millis(300));
        assert_eq!(config.write_timeout, Duration::from_secs(1));
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert!(config.verbose);
    }
}
