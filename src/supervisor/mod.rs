//! Process Supervision
//!
//! Owns the three children of the daemon and the system resources guarding
//! them:
//!
//! ```text
//! ProcessSupervisor
//!   ├─> X server      (own process group, -auth <authfile>)
//!   ├─> user session  (privileges dropped, own session)
//!   └─> greeter       (own process group, piped stdin/stdout)
//!
//! LockFile       single-instance PID file
//! AutologinSlot  System V semaphore, one autologin per boot
//! xauth          MIT-MAGIC-COOKIE-1 shared by server, session and greeter
//! ```
//!
//! Children are plain `std::process` children; their exits are collected by
//! the [`Reaper`] when SIGCHLD arrives, not by tokio.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, ChildStdout, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::lifecycle::crash;

pub mod autologin;
pub mod display;
pub mod error;
pub mod lock;
pub mod reaper;
pub mod session;
pub mod xauth;

pub use autologin::{AutologinSlot, SlotStatus};
pub use display::Display;
pub use error::{Result, SupervisorError};
pub use lock::{LockFile, LockStatus};
pub use reaper::{ChildExit, ChildStatus, Reaper};
pub use session::{SessionEnvironment, SessionRequest};
pub use xauth::Cookie;

/// Which supervised child a PID belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRole {
    DisplayServer,
    Session,
    Greeter,
}

/// Seam between the session controller and process management
#[cfg_attr(test, mockall::automock)]
pub trait SessionLauncher {
    /// Fork and exec the user session, returning its PID
    fn start_session(&mut self, request: &SessionRequest) -> Result<i32>;

    /// Terminate and reap a child's process group
    fn stop(&mut self, pid: i32) -> Result<Option<ChildStatus>>;

    /// PID of the running X server
    fn server_pid(&self) -> Option<i32>;
}

/// Greeter process with its protocol pipes
#[derive(Debug)]
pub struct GreeterProcess {
    pub pid: i32,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Owner of the X server, session and greeter processes
#[derive(Debug)]
pub struct ProcessSupervisor {
    display: Display,
    authfile: PathBuf,
    cookie: Cookie,
    session_env: SessionEnvironment,
    server_pid: Option<i32>,
    session_pid: Option<i32>,
    greeter_pid: Option<i32>,
    reaper: Reaper,
}

impl ProcessSupervisor {
    /// Create a supervisor with a freshly generated cookie
    pub fn new(config: &Config) -> Result<Self> {
        let display = Display::parse(&config.core.display)?;

        Ok(Self {
            display,
            authfile: config.core.authfile.clone(),
            cookie: Cookie::generate(),
            session_env: SessionEnvironment {
                launcher: config.session.launcher.clone(),
                path: config.core.path.clone(),
                error_log: config.session.error_log.clone(),
            },
            server_pid: None,
            session_pid: None,
            greeter_pid: None,
            reaper: Reaper::new(),
        })
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn authfile(&self) -> &Path {
        &self.authfile
    }

    pub fn cookie(&self) -> &Cookie {
        &self.cookie
    }

    pub fn session_pid(&self) -> Option<i32> {
        self.session_pid
    }

    pub fn greeter_pid(&self) -> Option<i32> {
        self.greeter_pid
    }

    /// Role of a child PID, if it is one of ours
    pub fn role_of(&self, pid: i32) -> Option<ChildRole> {
        if self.server_pid == Some(pid) {
            Some(ChildRole::DisplayServer)
        } else if self.session_pid == Some(pid) {
            Some(ChildRole::Session)
        } else if self.greeter_pid == Some(pid) {
            Some(ChildRole::Greeter)
        } else {
            None
        }
    }

    /// Write the authority file and launch the X server
    pub fn start_display_server(&mut self, command_line: &str) -> Result<i32> {
        let records = xauth::encode_for_host(self.display.number(), &self.cookie);
        xauth::write_file(&self.authfile, &records)?;
        debug!("Wrote server authority file {}", self.authfile.display());

        let mut cmd = display::server_command(command_line, &self.display, &self.authfile)?;
        cmd.process_group(0);

        let program = cmd.get_program().to_string_lossy().into_owned();
        info!("Starting X server: {:?}", cmd);

        let child = cmd
            .spawn()
            .map_err(|source| SupervisorError::Spawn { program, source })?;
        let pid = child.id() as i32;

        self.server_pid = Some(pid);
        crash::register_child(ChildRole::DisplayServer, pid);
        info!("X server started on {} (PID: {})", self.display.name(), pid);
        Ok(pid)
    }

    /// Poll the display socket until the server accepts connections
    ///
    /// Blocks the calling thread. Gives up early if the server exits.
    pub fn wait_reachable(&mut self, attempts: u32, interval: Duration) -> Result<()> {
        for attempt in 1..=attempts {
            if self.display.is_reachable() {
                info!("Display {} reachable after {} attempt(s)", self.display.name(), attempt);
                return Ok(());
            }

            if let Some(pid) = self.server_pid {
                if self.reaper.check_exited(pid)? {
                    warn!("X server (PID: {}) exited before accepting connections", pid);
                    return Err(SupervisorError::DisplayServerDied);
                }
            }

            debug!("Display {} not reachable yet ({}/{})", self.display.name(), attempt, attempts);
            std::thread::sleep(interval);
        }

        Err(SupervisorError::DisplayUnreachable {
            display: self.display.name().to_string(),
            attempts,
        })
    }

    /// Set the keyboard NumLock state through `numlockx`
    ///
    /// Best effort: a missing tool or failure is only logged.
    pub fn set_numlock(&self, state: &str) {
        let result = std::process::Command::new("numlockx")
            .arg(state)
            .env("DISPLAY", self.display.name())
            .env("XAUTHORITY", &self.authfile)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match result {
            Ok(status) if status.success() => debug!("NumLock set {}", state),
            Ok(status) => warn!("numlockx {} failed: {}", state, status),
            Err(e) => warn!("Could not run numlockx: {}", e),
        }
    }

    /// Launch the greeter with its protocol pipes
    pub fn start_greeter(&mut self, command_line: &str) -> Result<GreeterProcess> {
        let mut cmd = display::parse_command(command_line)?;
        cmd.env("DISPLAY", self.display.name())
            .env("XAUTHORITY", &self.authfile)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .process_group(0);

        let program = cmd.get_program().to_string_lossy().into_owned();
        let mut child = cmd
            .spawn()
            .map_err(|source| SupervisorError::Spawn { program, source })?;
        let pid = child.id() as i32;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SupervisorError::InvalidCommand(command_line.to_string()));
        };

        self.greeter_pid = Some(pid);
        crash::register_child(ChildRole::Greeter, pid);
        info!("Greeter started (PID: {})", pid);

        Ok(GreeterProcess { pid, stdin, stdout })
    }

    /// Terminate and reap a child's process group
    pub fn stop(&mut self, pid: i32) -> Result<Option<ChildStatus>> {
        if let Some(role) = self.role_of(pid) {
            self.forget(role);
        }
        self.reaper.stop(pid)
    }

    /// Exit notifications since the last call
    pub fn reap(&mut self) -> Vec<ChildExit> {
        self.reaper.reap()
    }

    /// Stop session, greeter and X server, in that order
    pub fn terminate_all(&mut self) {
        for pid in [self.session_pid, self.greeter_pid, self.server_pid]
            .into_iter()
            .flatten()
        {
            if let Err(e) = self.stop(pid) {
                warn!("Failed to stop process {}: {}", pid, e);
            }
        }

        if let Err(e) = std::fs::remove_file(&self.authfile) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.authfile.display(), e);
            }
        }
    }

    fn forget(&mut self, role: ChildRole) {
        match role {
            ChildRole::DisplayServer => self.server_pid = None,
            ChildRole::Session => self.session_pid = None,
            ChildRole::Greeter => self.greeter_pid = None,
        }
        crash::register_child(role, 0);
    }
}

impl SessionLauncher for ProcessSupervisor {
    fn start_session(&mut self, request: &SessionRequest) -> Result<i32> {
        let mut cmd =
            session::session_command(request, &self.session_env, &self.display, &self.cookie)?;

        let program = cmd.get_program().to_string_lossy().into_owned();
        info!(
            "Starting session for {} (session: {:?}, lang: {:?})",
            request.identity.name, request.session, request.lang
        );

        let child = cmd
            .spawn()
            .map_err(|source| SupervisorError::Spawn { program, source })?;
        let pid = child.id() as i32;

        self.session_pid = Some(pid);
        crash::register_child(ChildRole::Session, pid);
        info!("Session started for {} (PID: {})", request.identity.name, pid);
        Ok(pid)
    }

    fn stop(&mut self, pid: i32) -> Result<Option<ChildStatus>> {
        ProcessSupervisor::stop(self, pid)
    }

    fn server_pid(&self) -> Option<i32> {
        self.server_pid
    }
}
