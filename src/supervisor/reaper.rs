//! Child termination and reaping
//!
//! All children are started through `std::process::Command` and reaped here
//! with `waitpid`, never by tokio. Statuses collected while draining on
//! behalf of one child are queued, so the event loop still sees every exit.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::error::Result;

/// Grace period polls between SIGTERM and SIGKILL
const STOP_POLLS: u32 = 20;

/// Delay between grace period polls
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a child terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Normal exit with a code
    Exited(i32),
    /// Killed by a signal
    Signaled(Signal),
}

impl ChildStatus {
    fn from_wait(status: WaitStatus) -> Option<(i32, Self)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid.as_raw(), Self::Exited(code))),
            WaitStatus::Signaled(pid, sig, _) => Some((pid.as_raw(), Self::Signaled(sig))),
            _ => None,
        }
    }

    /// Signal that killed the child, if any
    pub fn signal(&self) -> Option<Signal> {
        match self {
            Self::Signaled(sig) => Some(*sig),
            Self::Exited(_) => None,
        }
    }
}

impl std::fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {}", code),
            Self::Signaled(sig) => write!(f, "signal {}", sig),
        }
    }
}

/// Exit notification for one child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: i32,
    pub status: ChildStatus,
}

/// Stops children and collects their exit statuses
#[derive(Debug, Default)]
pub struct Reaper {
    pending: VecDeque<ChildExit>,
}

impl Reaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminate `pid` and its process group, then reap it
    ///
    /// Returns the child's status when this call reaped it. Non-positive
    /// pids are a no-op. A leader that already exited (or was reaped
    /// elsewhere) still has the rest of its group torn down.
    pub fn stop(&mut self, pid: i32) -> Result<Option<ChildStatus>> {
        if pid <= 0 {
            return Ok(None);
        }
        let target = Pid::from_raw(pid);

        match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(ws) => {
                let status = ChildStatus::from_wait(ws).map(|(_, s)| s);
                self.stop_group(target);
                return Ok(status);
            }
            Err(Errno::ECHILD) => {
                trace!("stop({}): leader already reaped", pid);
                self.stop_group(target);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        debug!("Stopping process group {}", pid);
        signal_group(target, Signal::SIGTERM);
        let mut status = self.wait_grace(target)?;

        if status.is_none() {
            warn!("Process {} ignored SIGTERM, sending SIGKILL", pid);
            signal_group(target, Signal::SIGKILL);
            status = wait_blocking(target)?;
        }

        if let Some(status) = status {
            debug!("Process {} stopped ({})", pid, status);
        }
        self.stop_group(target);
        Ok(status)
    }

    /// Terminate whatever is left in a group whose leader is gone
    ///
    /// Members are usually orphans reparented to init, so they cannot be
    /// waited for; the group is polled until it is empty.
    fn stop_group(&mut self, group: Pid) {
        if group_alive(group) {
            debug!("Terminating leftover members of process group {}", group);
            let _ = signal::killpg(group, Signal::SIGTERM);

            for _ in 0..STOP_POLLS {
                self.drain();
                if !group_alive(group) {
                    return;
                }
                std::thread::sleep(STOP_POLL_INTERVAL);
            }

            warn!("Process group {} ignored SIGTERM, sending SIGKILL", group);
            let _ = signal::killpg(group, Signal::SIGKILL);
        }
        self.drain();
    }

    /// Reap `pid` if it already exited, queueing its status
    pub fn check_exited(&mut self, pid: i32) -> Result<bool> {
        if pid <= 0 {
            return Ok(false);
        }
        match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(false),
            Ok(ws) => {
                if let Some((pid, status)) = ChildStatus::from_wait(ws) {
                    self.pending.push_back(ChildExit { pid, status });
                }
                Ok(true)
            }
            Err(Errno::ECHILD) => Ok(self.pending.iter().any(|e| e.pid == pid)),
            Err(e) => Err(e.into()),
        }
    }

    /// Collect every exit that happened since the last call
    pub fn reap(&mut self) -> Vec<ChildExit> {
        self.drain();
        self.pending.drain(..).collect()
    }

    fn wait_grace(&mut self, target: Pid) -> Result<Option<ChildStatus>> {
        for _ in 0..STOP_POLLS {
            std::thread::sleep(STOP_POLL_INTERVAL);
            match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => continue,
                Ok(ws) => return Ok(ChildStatus::from_wait(ws).map(|(_, s)| s)),
                Err(Errno::ECHILD) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    fn drain(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(ws) => {
                    if let Some((pid, status)) = ChildStatus::from_wait(ws) {
                        trace!("Reaped child {} ({})", pid, status);
                        self.pending.push_back(ChildExit { pid, status });
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }
}

fn wait_blocking(target: Pid) -> Result<Option<ChildStatus>> {
    loop {
        match waitpid(target, None) {
            Ok(ws) => {
                if let Some((_, status)) = ChildStatus::from_wait(ws) {
                    return Ok(Some(status));
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Whether any process is left in `group`
fn group_alive(group: Pid) -> bool {
    signal::killpg(group, None).is_ok()
}

/// Signal a process group, falling back to the single process
fn signal_group(target: Pid, sig: Signal) {
    if signal::killpg(target, sig).is_err() {
        match signal::kill(target, sig) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!("Failed to send {} to {}: {}", sig, target, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    #[test]
    fn test_non_positive_pid_is_noop() {
        let mut reaper = Reaper::new();
        assert_eq!(reaper.stop(0).unwrap(), None);
        assert_eq!(reaper.stop(-1).unwrap(), None);
        assert!(!reaper.check_exited(0).unwrap());
    }

    #[test]
    fn test_stop_children() {
        let mut reaper = Reaper::new();

        // Running child in its own group: terminated and reaped
        let child = Command::new("sleep").arg("30").process_group(0).spawn().unwrap();
        let pid = child.id() as i32;
        assert_eq!(
            reaper.stop(pid).unwrap(),
            Some(ChildStatus::Signaled(Signal::SIGTERM))
        );
        assert_eq!(
            waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)),
            Err(Errno::ECHILD)
        );

        // Second stop is a no-op
        assert_eq!(reaper.stop(pid).unwrap(), None);

        // Child that ignores SIGTERM gets killed
        let stubborn = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .process_group(0)
            .spawn()
            .unwrap();
        let status = reaper.stop(stubborn.id() as i32).unwrap();
        assert_eq!(status, Some(ChildStatus::Signaled(Signal::SIGKILL)));

        // Exit of an unrelated child is queued, not lost
        let quick = Command::new("true").spawn().unwrap();
        let quick_pid = quick.id() as i32;
        std::thread::sleep(Duration::from_millis(200));
        assert!(reaper.check_exited(quick_pid).unwrap());
        let exits = reaper.reap();
        assert!(exits.contains(&ChildExit {
            pid: quick_pid,
            status: ChildStatus::Exited(0)
        }));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ChildStatus::Exited(3).to_string(), "exit code 3");
        assert_eq!(ChildStatus::Signaled(Signal::SIGHUP).signal(), Some(Signal::SIGHUP));
        assert_eq!(ChildStatus::Exited(0).signal(), None);
    }
}
