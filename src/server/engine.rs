use super::{ServerConfig, ServerState};
use crate::Result;
use crate::common::{guarded, lock, verbose};
use crate::framing::{self, DelimiterCodec, LoopExit, MessageSender};
use crate::network;
use crate::watchdog::Watchdog;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

type StateCallback = dyn Fn(&TcpServer, ServerState) + Send + Sync;

/// Whether `Connected` has been reported for a connection yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Announcement {
    Pending,
    Done,
    /// Released before `Connected` went out; `Listening` is owed after it
    ReleasedEarly,
}

/// The one client the server is currently talking to
struct ActiveConnection {
    id: u64,
    peer: SocketAddr,
    sender: MessageSender,
    cancel: CancellationToken,
    watchdog: Watchdog,
    announcement: Arc<Mutex<Announcement>>,
}

impl ActiveConnection {
    /// Stops the reader and watchdog. The writer flushes what is queued for
    /// at most [`framing::CLOSE_GRACE`], then drops the socket.
    fn close(self) {
        self.cancel.cancel();
        self.watchdog.stop();
    }
}

/// Termination flag plus the `Listening` notifications still being delivered
#[derive(Debug, Default)]
struct Lifecycle {
    terminated: bool,
    listening_in_flight: usize,
}

struct ServerInner {
    config: ServerConfig,
    on_state_changed: Box<StateCallback>,
    local_addr: Option<SocketAddr>,
    active: Mutex<Option<ActiveConnection>>,
    next_id: AtomicU64,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    settled: Notify,
    shutdown: broadcast::Sender<()>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// Single-client TCP server exchanging delimiter-framed messages
///
/// At most one client is served at a time; a second client is disconnected
/// right after it is accepted. Everything the server observes is reported
/// through the state-change callback, which runs on the server's tasks and
/// may call back into the server (for example to reply or disconnect).
///
/// `TcpServer` is a cheap handle: clones control the same server.
///
/// # Examples
///
/// An echo server:
///
/// ```no_run
/// use tcpcom::server::{ServerConfig, ServerState, TcpServer};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::new(22000).with_timeout_secs(30);
///     let server = TcpServer::start(config, |server, state| {
///         if let ServerState::Message(msg) = state {
///             server.send_message(msg);
///         }
///     })
///     .await;
///
///     server.run_until_ctrl_c().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TcpServer {
    inner: Arc<ServerInner>,
}

impl TcpServer {
    /// Binds the configured address and starts accepting clients
    ///
    /// Emits `Listening` on success. If the port cannot be bound, emits
    /// `PortInUse` and returns a server that never becomes operational.
    pub async fn start<F>(config: ServerConfig, on_state_changed: F) -> TcpServer
    where
        F: Fn(&TcpServer, ServerState) + Send + Sync + 'static,
    {
        let (shutdown, _) = broadcast::channel(1);
        let bound = network::bind_listener(config.bind_addr)
            .and_then(|listener| listener.local_addr().map(|addr| (listener, addr)));

        let server = TcpServer {
            inner: Arc::new(ServerInner {
                local_addr: bound.as_ref().ok().map(|(_, addr)| *addr),
                config,
                on_state_changed: Box::new(on_state_changed),
                active: Mutex::new(None),
                next_id: AtomicU64::new(0),
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::default()),
                settled: Notify::new(),
                shutdown,
                accept_task: Mutex::new(None),
            }),
        };

        match bound {
            Ok((listener, addr)) => {
                server.inner.running.store(true, Ordering::SeqCst);
                info!(address = %addr, "TCP server listening");
                server.notify(ServerState::Listening(addr.port()));

                let shutdown_rx = server.inner.shutdown.subscribe();
                let span = tracing::info_span!("tcp_server", port = addr.port());
                let task = tokio::spawn(
                    server
                        .clone()
                        .accept_loop(listener, shutdown_rx)
                        .instrument(span),
                );
                *lock(&server.inner.accept_task) = Some(task);
            }
            Err(e) => {
                let addr = server.inner.config.bind_addr;
                error!(address = %addr, error = %e, "Failed to bind TCP listener");
                server.notify(ServerState::PortInUse(addr.port()));
            }
        }

        server
    }

    /// Queues `message` for the connected client
    ///
    /// Does nothing when no client is connected. Write failures are logged
    /// and surface later as a disconnect.
    pub fn send_message(&self, message: impl Into<String>) {
        let message = message.into();
        let slot = lock(&self.inner.active);
        let Some(conn) = slot.as_ref() else {
            verbose!(self.inner.config.verbose, "Not connected, message dropped");
            return;
        };
        verbose!(self.inner.config.verbose, peer = %conn.peer, message = %message, "Sending message");
        if let Err(e) = conn.sender.send(message) {
            warn!(peer = %conn.peer, error = %e, "Failed to send message");
        }
    }

    /// Closes the connection to the current client and listens again
    ///
    /// Idempotent: without a connected client this does nothing.
    pub fn disconnect(&self) {
        let taken = lock(&self.inner.active).take();
        self.release(taken);
    }

    /// Stops the server for good
    ///
    /// Closes any client connection and ends the accept loop, which releases
    /// the port and emits `Terminated`. Use [`wait`](Self::wait) to await that.
    pub fn terminate(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            verbose!(self.inner.config.verbose, "Server not running");
            return;
        }

        let taken = {
            let mut slot = lock(&self.inner.active);
            lock(&self.inner.lifecycle).terminated = true;
            slot.take()
        };
        if let Some(conn) = taken {
            info!(peer = %conn.peer, "Closing client connection");
            conn.close();
        }
        let _ = self.inner.shutdown.send(());
    }

    /// Waits until the accept loop has ended
    pub async fn wait(&self) {
        let task = lock(&self.inner.accept_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Accept loop ended abnormally");
            }
        }
    }

    /// Serves until Ctrl-C is pressed or the server is terminated
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received shutdown signal, stopping server");
                self.terminate();
            }
            _ = shutdown_rx.recv() => {}
        }

        self.wait().await;
        Ok(())
    }

    /// True while a client is connected
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.active).is_some()
    }

    /// True between a successful start and termination
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.inner.lifecycle).terminated
    }

    /// Address the listener is bound to, if binding succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Address of the connected client
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner.active).as_ref().map(|conn| conn.peer)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    async fn accept_loop(self, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        if let Some(conn) = lock(&self.inner.active).take() {
            conn.close();
        }
        drop(listener);
        self.settle().await;
        info!("TCP server stopped");
        self.notify(ServerState::Terminated);
    }

    /// Waits for `Listening` notifications that started before termination
    async fn settle(&self) {
        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if lock(&self.inner.lifecycle).listening_in_flight == 0 {
                return;
            }
            settled.await;
        }
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let mut slot = lock(&self.inner.active);
        if lock(&self.inner.lifecycle).terminated {
            return;
        }
        if slot.is_some() {
            drop(slot);
            info!(%peer, "Connection refused: a client is already connected");
            drop(stream);
            return;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (reader, writer) = stream.into_split();
        let cancel = CancellationToken::new();
        let weak = Arc::downgrade(&self.inner);
        let sender = framing::spawn_writer(
            writer,
            self.codec(),
            self.inner.config.write_timeout,
            cancel.clone(),
            move |e| {
                warn!(%peer, error = %e, "Failed to write to client");
                if let Some(inner) = weak.upgrade() {
                    TcpServer { inner }.release_connection(id);
                }
            },
        );

        let weak = Arc::downgrade(&self.inner);
        let watchdog = Watchdog::start(self.inner.config.idle_timeout, move || {
            if let Some(inner) = weak.upgrade() {
                info!(%peer, "Client idle for too long");
                TcpServer { inner }.release_connection(id);
            }
        });

        let announcement = Arc::new(Mutex::new(Announcement::Pending));
        *slot = Some(ActiveConnection {
            id,
            peer,
            sender,
            cancel: cancel.clone(),
            watchdog: watchdog.clone(),
            announcement: announcement.clone(),
        });
        drop(slot);

        info!(%peer, "Client connected");
        self.notify(ServerState::Connected(peer));

        let released_early = {
            let mut announcement = lock(&announcement);
            let early = *announcement == Announcement::ReleasedEarly;
            *announcement = Announcement::Done;
            early
        };
        if released_early {
            self.announce_listening();
            return;
        }

        let span = tracing::info_span!("connection", %peer);
        tokio::spawn(
            self.clone()
                .receive(id, reader, cancel, watchdog)
                .instrument(span),
        );
    }

    async fn receive(
        self,
        id: u64,
        reader: OwnedReadHalf,
        cancel: CancellationToken,
        watchdog: Watchdog,
    ) {
        let verbose = self.inner.config.verbose;
        let exit = framing::receive_loop(
            reader,
            self.codec(),
            self.inner.config.buffer_size,
            &cancel,
            |message| {
                watchdog.reset();
                self.notify(ServerState::Message(message));
                // The callback may have disconnected this client
                if cancel.is_cancelled() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        )
        .await;

        match exit {
            LoopExit::Closed => {
                verbose!(verbose, "Client closed connection");
                self.release_connection(id);
            }
            LoopExit::Failed(e) => {
                warn!(error = %e, "Failed to read from client");
                self.release_connection(id);
            }
            LoopExit::Stopped => verbose!(verbose, "Receive loop stopped"),
        }
    }

    /// Disconnects `id` only if it is still the active connection
    fn release_connection(&self, id: u64) {
        let taken = {
            let mut slot = lock(&self.inner.active);
            match slot.as_ref() {
                Some(conn) if conn.id == id => slot.take(),
                _ => None,
            }
        };
        self.release(taken);
    }

    fn release(&self, taken: Option<ActiveConnection>) {
        let Some(conn) = taken else {
            verbose!(self.inner.config.verbose, "No client to disconnect");
            return;
        };

        info!(peer = %conn.peer, "Client disconnected");
        let announcement = conn.announcement.clone();
        conn.close();

        {
            let mut announcement = lock(&announcement);
            if *announcement == Announcement::Pending {
                *announcement = Announcement::ReleasedEarly;
                return;
            }
        }
        self.announce_listening();
    }

    /// Emits `Listening` unless the server is terminated
    ///
    /// `Terminated` is held back until every `Listening` that got past the
    /// check has been delivered.
    fn announce_listening(&self) {
        let Some(addr) = self.inner.local_addr else {
            return;
        };
        {
            let mut lifecycle = lock(&self.inner.lifecycle);
            if lifecycle.terminated {
                return;
            }
            lifecycle.listening_in_flight += 1;
        }

        self.notify(ServerState::Listening(addr.port()));

        let mut lifecycle = lock(&self.inner.lifecycle);
        lifecycle.listening_in_flight -= 1;
        if lifecycle.listening_in_flight == 0 {
            drop(lifecycle);
            self.inner.settled.notify_waiters();
        }
    }

    fn codec(&self) -> DelimiterCodec {
        DelimiterCodec::new(self.inner.config.delimiter)
            .with_max_length(self.inner.config.max_message_size)
    }

    fn notify(&self, state: ServerState) {
        verbose!(self.inner.config.verbose, state = state.name(), "State changed");
        guarded("server state callback", || {
            (self.inner.on_state_changed)(self, state)
        });
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.inner.local_addr)
            .field("running", &self.is_running())
            .field("connected", &self.is_connected())
            .finish()
    }
}
