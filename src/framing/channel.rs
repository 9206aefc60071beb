use super::DelimiterCodec;
use crate::{Result, TcpComError};
use futures::{SinkExt, StreamExt};
use std::io;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a receive loop stopped
#[derive(Debug)]
pub enum LoopExit {
    /// The peer closed the stream
    Closed,
    /// Reading or decoding failed
    Failed(io::Error),
    /// Cancelled locally or stopped by the message callback
    Stopped,
}

/// Handle for queueing outgoing messages on a connection's writer task
///
/// Sending never blocks: messages are framed and written in order by the
/// task started with [`spawn_writer`]. Dropping every handle flushes what is
/// queued and then shuts the write side down.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<String>,
}

impl MessageSender {
    /// Queues a message; fails once the writer has stopped
    pub fn send(&self, message: impl Into<String>) -> Result<()> {
        self.tx
            .send(message.into())
            .map_err(|_| TcpComError::Transport("Connection writer has stopped".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// How long a closed connection may keep flushing messages already queued
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Starts the writer task for one connection
///
/// Each write must finish within `write_timeout` (zero waits forever).
/// `on_error` is invoked once if a write fails or times out; the task ends
/// afterwards and further sends fail. Once `closing` is cancelled the task
/// keeps flushing for at most [`CLOSE_GRACE`], then drops the writer with
/// whatever is still queued.
pub fn spawn_writer<W, E>(
    writer: W,
    codec: DelimiterCodec,
    write_timeout: Duration,
    closing: CancellationToken,
    on_error: E,
) -> MessageSender
where
    W: AsyncWrite + Unpin + Send + 'static,
    E: FnOnce(io::Error) + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, codec);
        let drain = async {
            while let Some(message) = rx.recv().await {
                bounded(write_timeout, sink.send(message)).await?;
            }
            if let Err(e) = bounded(write_timeout, SinkExt::<String>::close(&mut sink)).await {
                debug!(error = %e, "Failed to shut down write side");
            }
            Ok::<(), io::Error>(())
        };
        let abandon = async {
            closing.cancelled().await;
            tokio::time::sleep(CLOSE_GRACE).await;
        };

        tokio::select! {
            result = drain => {
                if let Err(e) = result {
                    on_error(e);
                }
            }
            _ = abandon => debug!("Dropping unsent messages of a closed connection"),
        }
    });

    MessageSender { tx }
}

async fn bounded<F>(limit: Duration, write: F) -> io::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    if limit.is_zero() {
        return write.await;
    }
    tokio::time::timeout(limit, write)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "Write timed out"))?
}

/// Reads frames until the peer closes, an error occurs, `cancel` fires or
/// `on_message` breaks
///
/// Messages are handed to `on_message` in the order their bytes arrived,
/// however the reads happen to be chunked.
pub async fn receive_loop<R, F>(
    reader: R,
    codec: DelimiterCodec,
    buffer_size: usize,
    cancel: &CancellationToken,
    mut on_message: F,
) -> LoopExit
where
    R: AsyncRead + Unpin,
    F: FnMut(String) -> ControlFlow<()>,
{
    let mut frames = FramedRead::with_capacity(reader, codec, buffer_size);

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return LoopExit::Stopped,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(message)) => {
                if on_message(message).is_break() {
                    return LoopExit::Stopped;
                }
            }
            Some(Err(e)) => return LoopExit::Failed(e),
            None => return LoopExit::Closed,
        }
    }
}
