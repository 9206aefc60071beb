use std::fmt;

/// Notification delivered to the client's state-change callback
///
/// Connection-related variants carry the `host:port` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// A connection attempt started
    Connecting(String),
    /// The server accepted the connection
    Connected(String),
    /// The server could not be reached
    ConnectionFailed(String),
    /// The server closed the connection at once because it already serves a client
    ServerOccupied(String),
    /// The server closed an established connection or the link failed
    Disconnected,
    /// A complete message arrived from the server
    Message(String),
}

impl ClientState {
    /// Name of the state as used on the console and in logs
    pub fn name(&self) -> &'static str {
        match self {
            ClientState::Connecting(_) => "CONNECTING",
            ClientState::Connected(_) => "CONNECTED",
            ClientState::ConnectionFailed(_) => "CONNECTION_FAILED",
            ClientState::ServerOccupied(_) => "SERVER_OCCUPIED",
            ClientState::Disconnected => "DISCONNECTED",
            ClientState::Message(_) => "MESSAGE",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Connecting(target)
            | ClientState::Connected(target)
            | ClientState::ConnectionFailed(target)
            | ClientState::ServerOccupied(target) => write!(f, "{} {target}", self.name()),
            ClientState::Message(msg) => write!(f, "{} {msg}", self.name()),
            ClientState::Disconnected => f.write_str(self.name()),
        }
    }
}
