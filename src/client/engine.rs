use super::{ClientConfig, ClientState};
use crate::common::{guarded, lock, verbose};
use crate::framing::{self, DelimiterCodec, LoopExit, MessageSender};
use crate::network;
use crate::{Result, TcpComError};
use std::io;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

type StateCallback = dyn Fn(&TcpClient, ClientState) + Send + Sync;

const REPLY_CAPACITY: usize = 16;

/// Where a fresh link stands in the refusal handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Watching for the server closing the connection at once
    Probing,
    /// The server closed the connection during the probe
    Refused,
    /// `Connected` is being reported; incoming messages are still held back
    Confirmed,
    /// Messages are delivered as they arrive
    Open,
}

struct Handshake {
    phase: Phase,
    held: Vec<String>,
    lost: bool,
}

/// One TCP connection to the server
struct Link {
    id: u64,
    sender: MessageSender,
    /// Cancelled when the link is closed locally or lost
    closed: CancellationToken,
    replies: broadcast::Sender<String>,
    handshake: Mutex<Handshake>,
    refused: Notify,
}

struct ClientInner {
    host: String,
    port: u16,
    config: ClientConfig,
    on_state_changed: Box<StateCallback>,
    link: Mutex<Option<Arc<Link>>>,
    connecting: AtomicBool,
    next_id: AtomicU64,
}

/// TCP client exchanging delimiter-framed messages with a [`TcpServer`]
///
/// After connecting, the client watches the connection for a short refusal
/// window: a single-client server that is already busy accepts and then
/// immediately closes the socket, which is reported as `ServerOccupied`
/// instead of `Connected`. Messages arriving during that window are held and
/// delivered right after `Connected`.
///
/// `TcpClient` is a cheap handle: clones control the same client.
///
/// [`TcpServer`]: crate::server::TcpServer
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use tcpcom::client::TcpClient;
///
/// #[tokio::main]
/// async fn main() -> tcpcom::Result<()> {
///     let client = TcpClient::new("127.0.0.1", 22000, |_, state| println!("{state}"));
///     client.connect(Duration::from_secs(5)).await?;
///
///     let reply = client.send_message("ping", Duration::from_secs(2)).await;
///     println!("reply: {reply:?}");
///
///     client.disconnect();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TcpClient {
    inner: Arc<ClientInner>,
}

impl TcpClient {
    pub fn new<F>(host: impl Into<String>, port: u16, on_state_changed: F) -> Self
    where
        F: Fn(&TcpClient, ClientState) + Send + Sync + 'static,
    {
        Self::with_config(host, port, ClientConfig::default(), on_state_changed)
    }

    pub fn with_config<F>(
        host: impl Into<String>,
        port: u16,
        config: ClientConfig,
        on_state_changed: F,
    ) -> Self
    where
        F: Fn(&TcpClient, ClientState) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ClientInner {
                host: host.into(),
                port,
                config,
                on_state_changed: Box::new(on_state_changed),
                link: Mutex::new(None),
                connecting: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Connects to the server and runs the refusal probe
    ///
    /// A zero `timeout` falls back to the configured connect timeout; loopback
    /// targets are never subject to a timeout. An existing connection is
    /// closed first. Emits `Connecting`, then exactly one of `Connected`,
    /// `ConnectionFailed` or `ServerOccupied`.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        if self.inner.connecting.swap(true, Ordering::SeqCst) {
            return Err(TcpComError::Config(
                "A connection attempt is already in progress".to_string(),
            ));
        }
        let _connecting = ConnectingFlag(&self.inner.connecting);
        self.establish(timeout).await
    }

    /// Sends `message` and waits up to `response_timeout` for the next message
    /// from the server
    ///
    /// Returns `None` when not connected, on timeout, when the connection is
    /// lost while waiting, or immediately after sending if the timeout is zero.
    /// Replies are still delivered to the callback as `Message`.
    pub async fn send_message(
        &self,
        message: impl Into<String>,
        response_timeout: Duration,
    ) -> Option<String> {
        let message = message.into();
        let verbose = self.inner.config.verbose;
        let Some(link) = lock(&self.inner.link).clone() else {
            verbose!(verbose, "Not connected, message dropped");
            return None;
        };

        let mut replies = link.replies.subscribe();
        let closed = link.closed.clone();
        verbose!(verbose, message = %message, "Sending message");
        if let Err(e) = link.sender.send(message) {
            warn!(error = %e, "Failed to send message");
            self.lose(link.id);
            return None;
        }
        drop(link);

        if response_timeout.is_zero() {
            return None;
        }

        let waited = tokio::time::timeout(response_timeout, async {
            tokio::select! {
                biased;
                reply = next_reply(&mut replies) => reply,
                _ = closed.cancelled() => None,
            }
        })
        .await;

        match waited {
            Ok(Some(reply)) => Some(reply),
            Ok(None) => {
                verbose!(verbose, "Connection closed while waiting for reply");
                None
            }
            Err(_) => {
                verbose!(verbose, "Timeout while waiting for reply");
                None
            }
        }
    }

    /// Closes the connection without reporting `Disconnected`
    ///
    /// Idempotent.
    pub fn disconnect(&self) {
        let taken = lock(&self.inner.link).take();
        match taken {
            Some(link) => {
                info!(target_addr = %self.target(), "Closing connection");
                link.closed.cancel();
            }
            None => verbose!(self.inner.config.verbose, "Connection already closed"),
        }
    }

    /// True once `Connected` was reported and until the link is closed or lost
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.link).is_some()
    }

    /// True while `connect` is in progress
    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::SeqCst)
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    async fn establish(&self, timeout: Duration) -> Result<()> {
        if self.is_connected() {
            self.disconnect();
        }

        let target = self.target();
        self.notify(ClientState::Connecting(target.clone()));

        let timeout = if timeout.is_zero() {
            self.inner.config.connect_timeout
        } else {
            timeout
        };
        let stream = match self.open_stream(timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(target_addr = %target, error = %e, "Connection failed");
                self.notify(ClientState::ConnectionFailed(target.clone()));
                return Err(TcpComError::ConnectionFailed(target));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (reader, writer) = stream.into_split();
        let weak = Arc::downgrade(&self.inner);
        let closed = CancellationToken::new();
        let sender = framing::spawn_writer(
            writer,
            self.codec(),
            self.inner.config.write_timeout,
            closed.clone(),
            move |e| {
                warn!(error = %e, "Failed to write to server");
                lose_weak(&weak, id);
            },
        );

        let link = Arc::new(Link {
            id,
            sender,
            closed,
            replies: broadcast::channel(REPLY_CAPACITY).0,
            handshake: Mutex::new(Handshake {
                phase: Phase::Probing,
                held: Vec::new(),
                lost: false,
            }),
            refused: Notify::new(),
        });
        // Tears the link down if this future is dropped before the probe ends
        let probe_guard = link.closed.clone().drop_guard();

        let span = tracing::info_span!("tcp_client", target_addr = %target);
        tokio::spawn(self.clone().receive(link.clone(), reader).instrument(span));

        let _ = tokio::time::timeout(self.inner.config.refusal_probe, link.refused.notified()).await;

        {
            let mut handshake = lock(&link.handshake);
            if handshake.phase == Phase::Refused {
                drop(handshake);
                info!(target_addr = %target, "Server occupied");
                drop(probe_guard);
                self.notify(ClientState::ServerOccupied(target.clone()));
                return Err(TcpComError::ServerOccupied(target));
            }
            handshake.phase = Phase::Confirmed;
        }
        probe_guard.disarm();
        *lock(&self.inner.link) = Some(link.clone());

        info!(target_addr = %target, "Connected");
        self.notify(ClientState::Connected(target));
        self.release_held(&link);
        Ok(())
    }

    async fn open_stream(&self, timeout: Duration) -> io::Result<TcpStream> {
        let target = (self.inner.host.as_str(), self.inner.port);
        if timeout.is_zero() || network::is_loopback_host(&self.inner.host) {
            return TcpStream::connect(target).await;
        }
        tokio::time::timeout(timeout, TcpStream::connect(target))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "Connection timeout"))?
    }

    /// Delivers messages held during the probe, then opens the link
    fn release_held(&self, link: &Arc<Link>) {
        loop {
            let held = {
                let mut handshake = lock(&link.handshake);
                if handshake.held.is_empty() {
                    handshake.phase = Phase::Open;
                    if handshake.lost {
                        drop(handshake);
                        self.lose(link.id);
                    }
                    return;
                }
                std::mem::take(&mut handshake.held)
            };
            for message in held {
                self.deliver(link, message);
            }
        }
    }

    async fn receive(self, link: Arc<Link>, reader: OwnedReadHalf) {
        let verbose = self.inner.config.verbose;
        let exit = framing::receive_loop(
            reader,
            self.codec(),
            self.inner.config.buffer_size,
            &link.closed,
            |message| {
                self.accept(&link, message);
                ControlFlow::Continue(())
            },
        )
        .await;

        match exit {
            LoopExit::Closed => {
                verbose!(verbose, "Server closed connection");
                self.link_ended(&link);
            }
            LoopExit::Failed(e) => {
                debug!(error = %e, "Failed to read from server");
                self.link_ended(&link);
            }
            LoopExit::Stopped => verbose!(verbose, "Receive loop stopped"),
        }
    }

    fn accept(&self, link: &Link, message: String) {
        {
            let mut handshake = lock(&link.handshake);
            if handshake.phase != Phase::Open {
                handshake.held.push(message);
                return;
            }
        }
        self.deliver(link, message);
    }

    fn deliver(&self, link: &Link, message: String) {
        // No subscriber simply means nobody is waiting for a reply
        let _ = link.replies.send(message.clone());
        self.notify(ClientState::Message(message));
    }

    fn link_ended(&self, link: &Link) {
        let mut handshake = lock(&link.handshake);
        let phase = handshake.phase;
        match phase {
            Phase::Probing => {
                handshake.phase = Phase::Refused;
                drop(handshake);
                link.refused.notify_one();
            }
            Phase::Confirmed => handshake.lost = true,
            Phase::Refused => {}
            Phase::Open => {
                drop(handshake);
                self.lose(link.id);
            }
        }
    }

    /// Drops link `id` if it is still current and reports `Disconnected`
    fn lose(&self, id: u64) {
        let taken = {
            let mut slot = lock(&self.inner.link);
            match slot.as_ref() {
                Some(link) if link.id == id => slot.take(),
                _ => None,
            }
        };
        if let Some(link) = taken {
            link.closed.cancel();
            info!(target_addr = %self.target(), "Connection lost");
            self.notify(ClientState::Disconnected);
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.inner.host, self.inner.port)
    }

    fn codec(&self) -> DelimiterCodec {
        DelimiterCodec::new(self.inner.config.delimiter)
            .with_max_length(self.inner.config.max_message_size)
    }

    fn notify(&self, state: ClientState) {
        verbose!(self.inner.config.verbose, state = state.name(), "State changed");
        guarded("client state callback", || {
            (self.inner.on_state_changed)(self, state)
        });
    }
}

/// Clears the connecting flag even when `connect` is cancelled
struct ConnectingFlag<'a>(&'a AtomicBool);

impl Drop for ConnectingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn lose_weak(inner: &Weak<ClientInner>, id: u64) {
    if let Some(inner) = inner.upgrade() {
        TcpClient { inner }.lose(id);
    }
}

async fn next_reply(replies: &mut broadcast::Receiver<String>) -> Option<String> {
    loop {
        match replies.recv().await {
            Ok(reply) => return Some(reply),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Reply listener lagged"),
            Err(RecvError::Closed) => return None,
        }
    }
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn quick_probe() -> ClientConfig {
        crate::client::ClientConfigBuilder::new()
            .refusal_probe(Duration::from_millis(150))
            .build()
    }

    fn recording_client(port: u16) -> (TcpClient, mpsc::UnboundedReceiver<ClientState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = TcpClient::with_config("127.0.0.1", port, quick_probe(), move |_, state| {
            let _ = tx.send(state);
        });
        (client, rx)
    }

    #[tokio::test]
    async fn test_send_without_connection_returns_none() {
        let (client, mut rx) = recording_client(1);
        assert_eq!(client.send_message("hello", Duration::from_millis(50)).await, None);
        client.disconnect();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (client, mut rx) = recording_client(port);
        let result = client.connect(Duration::from_secs(1)).await;

        assert!(matches!(result, Err(TcpComError::ConnectionFailed(_))));
        let target = format!("127.0.0.1:{port}");
        assert_eq!(rx.recv().await, Some(ClientState::Connecting(target.clone())));
        assert_eq!(rx.recv().await, Some(ClientState::ConnectionFailed(target)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_immediate_close_reports_server_occupied() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let (client, mut rx) = recording_client(port);
        let result = client.connect(Duration::ZERO).await;

        assert!(matches!(result, Err(TcpComError::ServerOccupied(_))));
        assert!(matches!(rx.recv().await, Some(ClientState::Connecting(_))));
        assert!(matches!(rx.recv().await, Some(ClientState::ServerOccupied(_))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_greeting_during_probe_follows_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"welcome\0").await.unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
        });

        let (client, mut rx) = recording_client(port);
        client.connect(Duration::ZERO).await.unwrap();

        assert!(matches!(rx.recv().await, Some(ClientState::Connecting(_))));
        assert!(matches!(rx.recv().await, Some(ClientState::Connected(_))));
        assert_eq!(rx.recv().await, Some(ClientState::Message("welcome".into())));
        client.disconnect();
    }

    #[tokio::test]
    async fn test_send_message_waits_for_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ping\0");
            stream.write_all(b"pong\0").await.unwrap();
            let _ = stream.read(&mut buf).await;
        });

        let (client, _rx) = recording_client(port);
        client.connect(Duration::ZERO).await.unwrap();
        assert!(client.is_connected());

        let reply = client.send_message("ping", Duration::from_secs(2)).await;
        assert_eq!(reply.as_deref(), Some("pong"));

        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_peer_close_reports_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(400)).await;
            drop(stream);
        });

        let (client, mut rx) = recording_client(port);
        client.connect(Duration::ZERO).await.unwrap();

        assert!(matches!(rx.recv().await, Some(ClientState::Connecting(_))));
        assert!(matches!(rx.recv().await, Some(ClientState::Connected(_))));
        assert_eq!(rx.recv().await, Some(ClientState::Disconnected));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_server_not_reading_hits_write_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = crate::client::ClientConfigBuilder::new()
            .refusal_probe(Duration::from_millis(150))
            .write_timeout(Duration::from_millis(200))
            .build();
        let client = TcpClient::with_config("127.0.0.1", port, config, move |_, state| {
            let _ = tx.send(state);
        });
        client.connect(Duration::ZERO).await.unwrap();
        assert!(matches!(rx.recv().await, Some(ClientState::Connecting(_))));
        assert!(matches!(rx.recv().await, Some(ClientState::Connected(_))));

        let payload = "w".repeat(32 * 1024 * 1024);
        assert_eq!(client.send_message(payload, Duration::ZERO).await, None);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("write never timed out");
        assert_eq!(event, Some(ClientState::Disconnected));
        assert!(!client.is_connected());
    }
}
