use std::fmt;
use std::net::SocketAddr;

/// Notification delivered to the server's state-change callback
///
/// ```text
///  start ──▶ Listening ──accept──▶ Connected ──disconnect──▶ Listening
///    │                                 │
///    └─▶ PortInUse (bind failed)       └─ Message* while connected
///
///  any ──terminate──▶ Terminated
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    /// The port could not be bound; the server never becomes operational
    PortInUse(u16),
    /// Waiting for a client on the given port
    Listening(u16),
    /// A client was accepted
    Connected(SocketAddr),
    /// A complete message arrived from the connected client
    Message(String),
    /// The server stopped for good and released its port
    Terminated,
}

impl ServerState {
    /// Name of the state as used on the console and in logs
    pub fn name(&self) -> &'static str {
        match self {
            ServerState::PortInUse(_) => "PORT_IN_USE",
            ServerState::Listening(_) => "LISTENING",
            ServerState::Connected(_) => "CONNECTED",
            ServerState::Message(_) => "MESSAGE",
            ServerState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::PortInUse(port) | ServerState::Listening(port) => {
                write!(f, "{} {port}", self.name())
            }
            ServerState::Connected(addr) => write!(f, "{} {addr}", self.name()),
            ServerState::Message(msg) => write!(f, "{} {msg}", self.name()),
            ServerState::Terminated => f.write_str(self.name()),
        }
    }
}
