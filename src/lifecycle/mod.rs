//! Signal handling, exit reasons and restart policy
//!
//! Every way out of the event loop is an [`ExitReason`]. After cleanup the
//! [`RestartPolicy`] turns it into either a process exit code or a re-exec
//! of the daemon image ("respawn"), which keeps the PID, the lock and the
//! autologin slot.
//!
//! | Reason                                   | Decision        |
//! |------------------------------------------|-----------------|
//! | terminal runlevel (halt/reboot)          | exit 2          |
//! | `Clean`                                  | exit 0          |
//! | `SystemAction` (shutdown/reboot)         | exit 1          |
//! | `UserExit`, `TerminalRunlevel`           | exit 2          |
//! | `AlreadyRunning`, `DisplayUnreachable`, `Fatal` | exit 255 |
//! | `DisplayServerExited`, HUP/USR1/PIPE/ALRM/SEGV | respawn   |
//! | TERM/INT/QUIT                            | exit 0          |

use nix::sys::signal::Signal;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::time::Duration;
use tracing::{info, warn};

pub mod crash;
pub mod runlevel;
pub mod signals;

pub use runlevel::Runlevel;
pub use signals::{SignalEvent, SignalManager};

/// Environment variable carrying the consecutive respawn count
pub const RESPAWN_ENV: &str = "GOULD_RESPAWNS";

/// Runs shorter than this count towards the respawn limit
pub const MIN_STABLE_UPTIME: Duration = Duration::from_secs(30);

/// Why the daemon is leaving its event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Orderly administrative exit
    Clean,
    /// Another instance holds the lock
    AlreadyRunning,
    /// X server never became reachable
    DisplayUnreachable,
    /// X server went away while running
    DisplayServerExited,
    /// Shutdown or reboot requested from the front-end
    SystemAction,
    /// Explicit `exit` from the front-end
    UserExit,
    /// Session ended while the system is halting or rebooting
    TerminalRunlevel,
    /// Routed signal received
    Signal(i32),
    /// Unrecoverable startup or runtime error
    Fatal,
}

impl ExitReason {
    fn signal(&self) -> Option<Signal> {
        match self {
            Self::Signal(n) => Signal::try_from(*n).ok(),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.signal() {
            Some(sig) => write!(f, "signal {}", sig),
            None => write!(f, "{:?}", self),
        }
    }
}

/// What to do once cleanup is complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Re-exec with the given consecutive respawn count
    Respawn { count: u32 },
    /// Exit with the given code
    Terminate(i32),
}

/// Maps exit reasons to exit codes or respawns
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    max_respawns: u32,
    respawns: u32,
}

impl RestartPolicy {
    pub fn new(max_respawns: u32, respawns: u32) -> Self {
        Self {
            max_respawns,
            respawns,
        }
    }

    /// Policy for this process, reading the count left by a previous image
    pub fn from_env(max_respawns: u32) -> Self {
        Self::new(max_respawns, respawn_count())
    }

    pub fn respawns(&self) -> u32 {
        self.respawns
    }

    /// Decide after a run that lasted `uptime`
    pub fn decide(&self, reason: ExitReason, runlevel: &Runlevel, uptime: Duration) -> RestartDecision {
        if runlevel.is_terminal() {
            return RestartDecision::Terminate(2);
        }

        let respawn = match reason {
            ExitReason::Clean => return RestartDecision::Terminate(0),
            ExitReason::SystemAction => return RestartDecision::Terminate(1),
            ExitReason::UserExit | ExitReason::TerminalRunlevel => {
                return RestartDecision::Terminate(2)
            }
            ExitReason::AlreadyRunning | ExitReason::DisplayUnreachable | ExitReason::Fatal => {
                return RestartDecision::Terminate(255)
            }
            ExitReason::DisplayServerExited => true,
            ExitReason::Signal(_) => matches!(
                reason.signal(),
                Some(
                    Signal::SIGHUP
                        | Signal::SIGUSR1
                        | Signal::SIGPIPE
                        | Signal::SIGALRM
                        | Signal::SIGSEGV
                )
            ),
        };

        if !respawn {
            return RestartDecision::Terminate(0);
        }

        let count = self.next_count(uptime);
        if count > self.max_respawns {
            warn!(
                "Respawned {} times in quick succession, giving up",
                self.respawns
            );
            return RestartDecision::Terminate(255);
        }
        RestartDecision::Respawn { count }
    }

    /// Respawn count for the next image
    pub fn next_count(&self, uptime: Duration) -> u32 {
        if uptime < MIN_STABLE_UPTIME {
            self.respawns + 1
        } else {
            1
        }
    }
}

/// Consecutive respawn count inherited through the environment
pub fn respawn_count() -> u32 {
    std::env::var(RESPAWN_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Replace this process with a fresh daemon image
///
/// Only returns on failure.
pub fn respawn(count: u32) -> anyhow::Error {
    let mut args = std::env::args_os();
    let argv0 = args.next().unwrap_or_else(|| OsString::from("gould"));

    info!("Respawning (consecutive respawn {})", count);
    let err = std::process::Command::new("/proc/self/exe")
        .arg0(argv0)
        .args(args)
        .env(RESPAWN_ENV, count.to_string())
        .env_remove(crash::CRASH_ENV)
        .exec();

    anyhow::Error::new(err).context("Failed to re-execute daemon")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_secs(1);
    const LONG: Duration = Duration::from_secs(3600);

    fn sig(s: Signal) -> ExitReason {
        ExitReason::Signal(s as i32)
    }

    #[test]
    fn test_exit_codes() {
        let policy = RestartPolicy::new(5, 0);
        let level = Runlevel::Other("5".into());

        assert_eq!(policy.decide(ExitReason::Clean, &level, LONG), RestartDecision::Terminate(0));
        assert_eq!(policy.decide(ExitReason::SystemAction, &level, LONG), RestartDecision::Terminate(1));
        assert_eq!(policy.decide(ExitReason::UserExit, &level, LONG), RestartDecision::Terminate(2));
        assert_eq!(policy.decide(ExitReason::TerminalRunlevel, &level, LONG), RestartDecision::Terminate(2));
        assert_eq!(policy.decide(ExitReason::AlreadyRunning, &level, LONG), RestartDecision::Terminate(255));
        assert_eq!(policy.decide(ExitReason::DisplayUnreachable, &level, LONG), RestartDecision::Terminate(255));
        assert_eq!(policy.decide(ExitReason::Fatal, &level, LONG), RestartDecision::Terminate(255));
    }

    #[test]
    fn test_signals() {
        let policy = RestartPolicy::new(5, 0);
        let level = Runlevel::Unknown;

        for s in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGQUIT] {
            assert_eq!(policy.decide(sig(s), &level, LONG), RestartDecision::Terminate(0));
        }
        for s in [Signal::SIGHUP, Signal::SIGUSR1, Signal::SIGPIPE, Signal::SIGALRM, Signal::SIGSEGV] {
            assert_eq!(
                policy.decide(sig(s), &level, LONG),
                RestartDecision::Respawn { count: 1 }
            );
        }
        assert_eq!(
            policy.decide(ExitReason::DisplayServerExited, &level, LONG),
            RestartDecision::Respawn { count: 1 }
        );
    }

    #[test]
    fn test_terminal_runlevel_wins() {
        let policy = RestartPolicy::new(5, 0);
        for level in [Runlevel::Halt, Runlevel::Reboot] {
            assert_eq!(
                policy.decide(sig(Signal::SIGHUP), &level, LONG),
                RestartDecision::Terminate(2)
            );
            assert_eq!(policy.decide(ExitReason::Clean, &level, LONG), RestartDecision::Terminate(2));
        }
    }

    #[test]
    fn test_respawn_limit() {
        let level = Runlevel::Unknown;

        let policy = RestartPolicy::new(5, 3);
        assert_eq!(
            policy.decide(ExitReason::DisplayServerExited, &level, SHORT),
            RestartDecision::Respawn { count: 4 }
        );

        let exhausted = RestartPolicy::new(5, 5);
        assert_eq!(
            exhausted.decide(ExitReason::DisplayServerExited, &level, SHORT),
            RestartDecision::Terminate(255)
        );

        // A long stable run resets the count
        assert_eq!(
            exhausted.decide(ExitReason::DisplayServerExited, &level, LONG),
            RestartDecision::Respawn { count: 1 }
        );
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(sig(Signal::SIGHUP).to_string(), "signal SIGHUP");
        assert_eq!(ExitReason::UserExit.to_string(), "UserExit");
    }
}
