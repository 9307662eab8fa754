//! External greeter channel
//!
//! The greeter is a separate program drawing the login screen. It talks to
//! the daemon over its stdin/stdout using the line protocol in
//! [`protocol`]. A greeter that exits or closes its pipe is marked dead and
//! is not restarted until the daemon selects a front-end again.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

use crate::supervisor::ProcessSupervisor;

pub mod protocol;

pub use protocol::{DaemonCommand, GreeterCommand, LineSplitter, ProtocolError};

/// Log target for messages forwarded by the greeter
pub const GREETER_LOG_TARGET: &str = "gould::greeter";

const READ_CHUNK: usize = 1024;

/// Live connection to a greeter process
pub struct GreeterChannel<R = ChildStdout, W = ChildStdin> {
    pid: i32,
    reader: R,
    writer: Option<W>,
    splitter: LineSplitter,
    ready: VecDeque<String>,
    eof: bool,
    alive: bool,
}

impl GreeterChannel {
    /// Start the greeter and attach to its pipes
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(supervisor: &mut ProcessSupervisor, command_line: &str) -> Result<Self> {
        let process = supervisor
            .start_greeter(command_line)
            .context("Failed to start greeter")?;

        let writer = ChildStdin::from_std(process.stdin).context("Failed to register greeter stdin")?;
        let reader = ChildStdout::from_std(process.stdout).context("Failed to register greeter stdout")?;

        Ok(Self::from_pipes(process.pid, reader, writer))
    }
}

impl<R, W> GreeterChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap existing pipes
    pub fn from_pipes(pid: i32, reader: R, writer: W) -> Self {
        Self {
            pid,
            reader,
            writer: Some(writer),
            splitter: LineSplitter::new(),
            ready: VecDeque::new(),
            eof: false,
            alive: true,
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// The greeter process is gone; stop writing to it
    pub fn mark_dead(&mut self) {
        if self.alive {
            debug!("Greeter (PID: {}) marked dead", self.pid);
        }
        self.alive = false;
        self.writer = None;
    }

    /// Send a notification; a no-op once the greeter is dead
    pub async fn send(&mut self, command: DaemonCommand) -> Result<()> {
        let Some(writer) = self.writer.as_mut().filter(|_| self.alive) else {
            debug!("Not sending {:?}: greeter is gone", command);
            return Ok(());
        };

        let result = async {
            writer.write_all(command.as_line().as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            self.mark_dead();
            return Err(e).context("Failed to write to greeter");
        }
        debug!("Sent {:?} to greeter", command);
        Ok(())
    }

    /// Next well-formed command, or `None` at end of stream
    ///
    /// Cancel safe: buffered lines survive a dropped future.
    pub async fn next_command(&mut self) -> Option<GreeterCommand> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            while let Some(line) = self.ready.pop_front() {
                match GreeterCommand::parse(&line) {
                    Ok(command) => return Some(command),
                    Err(e) => warn!("Ignoring greeter line: {}", e),
                }
            }

            if self.eof {
                return None;
            }

            match self.reader.read(&mut buf).await {
                Ok(0) => {
                    let dropped = self.splitter.finish();
                    if dropped > 0 {
                        debug!("Discarded {} bytes of unterminated greeter input", dropped);
                    }
                    info!("Greeter closed its output");
                    self.eof = true;
                }
                Ok(n) => {
                    self.ready.extend(self.splitter.push(&buf[..n]));
                    let dropped = self.splitter.take_dropped();
                    if dropped > 0 {
                        warn!("Dropped {} greeter lines longer than {} bytes", dropped, protocol::MAX_LINE);
                    }
                }
                Err(e) => {
                    warn!("Failed to read from greeter: {}", e);
                    self.splitter.finish();
                    self.eof = true;
                }
            }
        }
    }

    /// Tell the greeter to exit and drop the pipes
    ///
    /// The caller stops the process afterwards.
    pub async fn close(&mut self) {
        if let Err(e) = self.send(DaemonCommand::Exit).await {
            debug!("Greeter exit notification failed: {:#}", e);
        }
        self.mark_dead();
    }
}

impl GreeterChannel {
    /// Send `exit`, then stop and reap the greeter process
    pub async fn shutdown(mut self, supervisor: &mut ProcessSupervisor) {
        self.close().await;
        if let Err(e) = supervisor.stop(self.pid) {
            warn!("Failed to stop greeter (PID: {}): {}", self.pid, e);
        }
    }
}
