//! Signal routing for the event loop
//!
//! The daemon-terminating signals all feed one channel; SIGCHLD has its own
//! stream and only triggers reaping.

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Signals that end the event loop
pub const ROUTED_SIGNALS: [Signal; 7] = [
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGHUP,
    Signal::SIGPIPE,
    Signal::SIGUSR1,
    Signal::SIGALRM,
    Signal::SIGQUIT,
];

/// Signal delivered to the event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// One of [`ROUTED_SIGNALS`]
    Routed(i32),
    /// SIGCHLD: at least one child changed state
    Child,
}

/// Async signal sources for the event loop
///
/// Must be created inside a tokio runtime.
pub struct SignalManager {
    routed: mpsc::UnboundedReceiver<i32>,
    child: tokio::signal::unix::Signal,
}

impl SignalManager {
    /// Register all handlers
    pub fn install() -> Result<Self> {
        let (tx, routed) = mpsc::unbounded_channel();

        for sig in ROUTED_SIGNALS {
            let number = sig as i32;
            let mut stream = signal(SignalKind::from_raw(number))
                .with_context(|| format!("Failed to install {} handler", sig))?;
            let tx = tx.clone();

            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    debug!("Received {}", sig);
                    if tx.send(number).is_err() {
                        break;
                    }
                }
            });
        }

        let child = signal(SignalKind::child()).context("Failed to install SIGCHLD handler")?;

        info!("Signal handlers installed");
        Ok(Self { routed, child })
    }

    /// Next signal event
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<SignalEvent> {
        tokio::select! {
            Some(number) = self.routed.recv() => Some(SignalEvent::Routed(number)),
            Some(()) = self.child.recv() => Some(SignalEvent::Child),
            else => None,
        }
    }
}
