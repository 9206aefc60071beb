//! Idle timer that fires once when a connection stays silent too long

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

#[derive(Debug)]
enum Command {
    Reset,
    Stop,
}

/// Handle to a running idle timer
///
/// The timer task owns the deadline; `reset` and `stop` are messages to it,
/// so no counter is shared between tasks. Cloned handles control the same
/// timer. The timer also stops once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct Watchdog {
    commands: Option<mpsc::UnboundedSender<Command>>,
}

impl Watchdog {
    /// Starts a timer that calls `on_timeout` after `timeout` without a reset
    ///
    /// A zero `timeout` yields a disabled watchdog that never fires.
    pub fn start<F>(timeout: Duration, on_timeout: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        if timeout.is_zero() {
            return Self::disabled();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut deadline = Instant::now() + timeout;
            loop {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(Command::Reset) => deadline = Instant::now() + timeout,
                        Some(Command::Stop) | None => {
                            tracing::trace!("Watchdog stopped");
                            return;
                        }
                    },
                    _ = sleep_until(deadline) => {
                        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Watchdog fired");
                        on_timeout();
                        return;
                    }
                }
            }
        });

        Self { commands: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { commands: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.commands.is_some()
    }

    /// Restarts the idle period
    pub fn reset(&self) {
        self.command(Command::Reset);
    }

    /// Ends the timer without firing
    pub fn stop(&self) {
        self.command(Command::Stop);
    }

    fn command(&self, command: Command) {
        if let Some(tx) = &self.commands {
            // The task may already have fired
            let _ = tx.send(command);
        }
    }
}
