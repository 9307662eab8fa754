//! Login orchestration
//!
//! The [`SessionController`] tracks the one user session the daemon may run.
//! It is either `Idle` or `Running`; a login while running forks nothing.
//!
//! # Login sequence
//!
//! ```text
//! login(identity, session?, lang?)
//!   ├─> open privilege context (failure logged, login proceeds)
//!   ├─> resolve DESKTOP and LANG: explicit → ~/.config → /etc/sysconfig
//!   ├─> write explicit choices back to the user's files
//!   ├─> SessionLauncher::start_session
//!   └─> remember the user in the last-user cache
//! ```
//!
//! Process management sits behind [`SessionLauncher`] so the state machine
//! can be driven without forking.

use anyhow::Result;
use chrono::{DateTime, Local};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::auth::{AuthOutcome, AuthStatus, CredentialStore, UserIdentity};
use crate::config::Config;
use crate::lifecycle::{ExitReason, Runlevel};
use crate::supervisor::{AutologinSlot, ChildStatus, SessionLauncher, SessionRequest, SlotStatus};

pub mod actions;
pub mod cache;
pub mod desktops;
pub mod resources;

pub use actions::{SystemAction, SystemCommands};
pub use cache::LastUserCache;
pub use desktops::DesktopSession;

/// The running user session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Login name
    pub user: String,

    /// Session process (group leader)
    pub session_pid: i32,

    /// X server the session talks to
    pub server_pid: Option<i32>,

    /// When the session was forked
    pub started_at: DateTime<Local>,
}

/// Controller state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running(SessionHandle),
}

/// Result of a login request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    /// A new session was started
    Started(SessionHandle),
    /// A session is already active; nothing was started
    AlreadyRunning,
}

/// Preference file locations
#[derive(Debug, Clone)]
pub struct PreferenceFiles {
    /// Desktop preference, relative to the user's home
    pub user_desktop: PathBuf,
    /// Locale preference, relative to the user's home
    pub user_i18n: PathBuf,
    pub system_desktop: PathBuf,
    pub system_i18n: PathBuf,
}

impl PreferenceFiles {
    pub fn new(config: &Config) -> Self {
        Self {
            user_desktop: config.session.user_desktop_file.clone(),
            user_i18n: config.session.user_i18n_file.clone(),
            system_desktop: config.session.system_desktop_file.clone(),
            system_i18n: config.session.system_i18n_file.clone(),
        }
    }
}

/// Credentials used for the automatic login
#[derive(Debug, Clone)]
pub struct AutologinAccount {
    pub user: String,
    pub password: Option<String>,
}

/// Single-session login state machine
pub struct SessionController {
    state: SessionState,
    credentials: Box<dyn CredentialStore>,
    preferences: PreferenceFiles,
    commands: SystemCommands,
    cache: LastUserCache,
    autologin: Option<AutologinAccount>,
    slot: Option<AutologinSlot>,
    runlevel: fn() -> Runlevel,
}

impl SessionController {
    /// Build a controller from configuration
    pub fn new(config: &Config, credentials: Box<dyn CredentialStore>) -> Self {
        let autologin = config
            .core
            .autologin
            .as_ref()
            .filter(|u| !u.is_empty())
            .map(|user| AutologinAccount {
                user: user.clone(),
                password: config.core.password.clone(),
            });

        Self {
            state: SessionState::Idle,
            credentials,
            preferences: PreferenceFiles::new(config),
            commands: SystemCommands::new(&config.commands),
            cache: LastUserCache::new(config.session.cache_file.clone()),
            autologin,
            slot: None,
            runlevel: Runlevel::current,
        }
    }

    /// Attach the autologin semaphore
    pub fn with_autologin_slot(mut self, slot: AutologinSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Replace the runlevel probe
    pub fn with_runlevel_probe(mut self, probe: fn() -> Runlevel) -> Self {
        self.runlevel = probe;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running(_))
    }

    /// PID of the running session, if any
    pub fn session_pid(&self) -> Option<i32> {
        match &self.state {
            SessionState::Running(handle) => Some(handle.session_pid),
            SessionState::Idle => None,
        }
    }

    /// Verify credentials with the configured backend
    pub fn authenticate(&mut self, user: &str, password: Option<String>) -> AuthOutcome {
        let outcome = self.credentials.authenticate(user, password);
        if outcome.is_success() {
            info!("Authentication succeeded for {}", user);
        } else {
            info!("Authentication failed for {}: {:?}", user, outcome.status);
        }
        outcome
    }

    /// Start a session for an authenticated identity
    pub fn login(
        &mut self,
        launcher: &mut dyn SessionLauncher,
        identity: UserIdentity,
        session: Option<&str>,
        lang: Option<&str>,
    ) -> Result<LoginResult> {
        if let SessionState::Running(handle) = &self.state {
            info!(
                "Login for {} ignored: session of {} still running",
                identity.name, handle.user
            );
            return Ok(LoginResult::AlreadyRunning);
        }

        if let Err(e) = self.credentials.open_session(&identity) {
            warn!("Failed to open session context for {}: {:#}", identity.name, e);
        }

        let request = SessionRequest {
            session: self.resolve_preference(&identity, session, resources::DESKTOP_KEY),
            lang: self.resolve_preference(&identity, lang, resources::LANG_KEY),
            identity,
        };

        let session_pid = match launcher.start_session(&request) {
            Ok(pid) => pid,
            Err(e) => {
                self.credentials.close_session();
                return Err(anyhow::Error::new(e).context("Failed to start user session"));
            }
        };

        if let Err(e) = self.cache.store(&request.identity.name) {
            warn!("Failed to update {}: {}", self.cache.path().display(), e);
        }

        let handle = SessionHandle {
            user: request.identity.name.clone(),
            session_pid,
            server_pid: launcher.server_pid(),
            started_at: Local::now(),
        };
        info!(
            "Session for {} running since {} (PID: {})",
            handle.user,
            handle.started_at.format("%Y-%m-%d %H:%M:%S"),
            handle.session_pid
        );

        self.state = SessionState::Running(handle.clone());
        Ok(LoginResult::Started(handle))
    }

    fn resolve_preference(
        &self,
        identity: &UserIdentity,
        explicit: Option<&str>,
        key: &str,
    ) -> Option<String> {
        let (user_rel, system) = if key == resources::DESKTOP_KEY {
            (&self.preferences.user_desktop, &self.preferences.system_desktop)
        } else {
            (&self.preferences.user_i18n, &self.preferences.system_i18n)
        };
        let resolved = resources::resolve(explicit, &identity.home, user_rel, system, key);
        debug!("{} for {} resolved to {:?}", key, identity.name, resolved);

        if resolved.explicit {
            if let Some(value) = &resolved.value {
                let owner = (identity.uid, identity.gid);
                if let Err(e) =
                    resources::write_user_value(&identity.home, user_rel, key, value, owner)
                {
                    warn!("Failed to save {} preference for {}: {}", key, identity.name, e);
                }
            }
        }

        resolved.value
    }

    /// Handle the exit of the session process
    ///
    /// Returns `TerminalRunlevel` when the system is halting or rebooting.
    pub fn on_session_exit(
        &mut self,
        launcher: &mut dyn SessionLauncher,
        status: ChildStatus,
    ) -> Option<ExitReason> {
        let SessionState::Running(handle) = std::mem::replace(&mut self.state, SessionState::Idle)
        else {
            return None;
        };

        info!("Session of {} ended ({})", handle.user, status);

        if status.signal() == Some(Signal::SIGHUP) {
            let _ = signal::killpg(Pid::from_raw(handle.session_pid), Signal::SIGHUP);
        }
        if let Err(e) = launcher.stop(handle.session_pid) {
            warn!("Failed to stop session group {}: {}", handle.session_pid, e);
        }
        self.credentials.close_session();

        if (self.runlevel)().is_terminal() {
            info!("System is going down, not restarting the front-end");
            return Some(ExitReason::TerminalRunlevel);
        }
        None
    }

    /// Stop the running session, if any
    pub fn stop_session(&mut self, launcher: &mut dyn SessionLauncher) {
        if let SessionState::Running(handle) = std::mem::replace(&mut self.state, SessionState::Idle) {
            info!("Stopping session of {}", handle.user);
            if let Err(e) = launcher.stop(handle.session_pid) {
                warn!("Failed to stop session group {}: {}", handle.session_pid, e);
            }
            self.credentials.close_session();
        }
    }

    /// Run a system action
    ///
    /// Returns the exit reason when the action ends the daemon.
    pub fn system_action(&mut self, action: SystemAction) -> Option<ExitReason> {
        match action {
            SystemAction::Suspend => {
                self.suspend();
                None
            }
            SystemAction::Shutdown => Some(self.shutdown()),
            SystemAction::Reboot => Some(self.reboot()),
            SystemAction::Exit => Some(self.exit()),
        }
    }

    pub fn suspend(&self) {
        if let Err(e) = self.commands.run(SystemAction::Suspend) {
            warn!("Suspend failed: {:#}", e);
        }
    }

    pub fn shutdown(&self) -> ExitReason {
        if let Err(e) = self.commands.run(SystemAction::Shutdown) {
            warn!("Shutdown failed: {:#}", e);
        }
        ExitReason::SystemAction
    }

    pub fn reboot(&self) -> ExitReason {
        if let Err(e) = self.commands.run(SystemAction::Reboot) {
            warn!("Reboot failed: {:#}", e);
        }
        ExitReason::SystemAction
    }

    /// Leave for good, giving the autologin slot back
    pub fn exit(&mut self) -> ExitReason {
        if let Some(slot) = &self.slot {
            if let Err(e) = slot.release() {
                warn!("Failed to release autologin slot: {}", e);
            }
        }
        ExitReason::UserExit
    }

    /// User to pre-fill in the front-end
    pub fn last_user(&self) -> Option<String> {
        self.cache.load()
    }

    /// Log the configured user in automatically, once per boot
    ///
    /// `Ok(None)` means no session was started and a front-end is needed.
    pub fn try_autologin(&mut self, launcher: &mut dyn SessionLauncher) -> Result<Option<LoginResult>> {
        let Some(account) = self.autologin.clone() else {
            return Ok(None);
        };
        let Some(slot) = &self.slot else {
            warn!("Autologin configured but no autologin slot available");
            return Ok(None);
        };

        if slot.try_acquire()? == SlotStatus::Unavailable {
            info!("Autologin for {} already used", account.user);
            return Ok(None);
        }

        let password = account.password.clone().unwrap_or_default();
        let outcome = self.authenticate(&account.user, Some(password));
        let status = outcome.status;
        let Some(identity) = outcome.identity.filter(|_| status == AuthStatus::Success) else {
            warn!("Autologin for {} rejected: {:?}", account.user, status);
            return Ok(None);
        };

        info!("Automatic login for {}", account.user);
        self.login(launcher, identity, None, None).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockCredentialStore;
    use crate::supervisor::MockSessionLauncher;
    use tempfile::TempDir;

    fn identity(home: &std::path::Path) -> UserIdentity {
        UserIdentity {
            name: "alice".to_string(),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            home: home.to_path_buf(),
            shell: PathBuf::from("/bin/sh"),
        }
    }

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.session.cache_file = dir.path().join("cache/last-user");
        config.session.system_desktop_file = dir.path().join("sys-desktop");
        config.session.system_i18n_file = dir.path().join("sys-i18n");
        config
    }

    fn credentials() -> MockCredentialStore {
        let mut store = MockCredentialStore::new();
        store.expect_open_session().returning(|_| Ok(()));
        store.expect_close_session().return_const(());
        store
    }

    fn not_going_down() -> Runlevel {
        Runlevel::Other("5".to_string())
    }

    fn halting() -> Runlevel {
        Runlevel::Halt
    }

    #[test]
    fn test_second_login_forks_nothing() {
        let dir = TempDir::new().unwrap();
        let mut controller = SessionController::new(&config(&dir), Box::new(credentials()))
            .with_runlevel_probe(not_going_down);

        let mut launcher = MockSessionLauncher::new();
        launcher.expect_start_session().times(1).returning(|_| Ok(4242));
        launcher.expect_server_pid().return_const(Some(100));

        let first = controller
            .login(&mut launcher, identity(dir.path()), None, None)
            .unwrap();
        match first {
            LoginResult::Started(handle) => {
                assert_eq!(handle.session_pid, 4242);
                assert_eq!(handle.server_pid, Some(100));
            }
            LoginResult::AlreadyRunning => panic!("expected a new session"),
        }

        let second = controller
            .login(&mut launcher, identity(dir.path()), Some("kde"), None)
            .unwrap();
        assert_eq!(second, LoginResult::AlreadyRunning);
        assert_eq!(controller.session_pid(), Some(4242));
        assert_eq!(controller.last_user().as_deref(), Some("alice"));
    }

    #[test]
    fn test_session_exit_returns_to_idle() {
        let dir = TempDir::new().unwrap();
        let mut controller = SessionController::new(&config(&dir), Box::new(credentials()))
            .with_runlevel_probe(not_going_down);

        let mut launcher = MockSessionLauncher::new();
        launcher.expect_start_session().times(2).returning(|_| Ok(4242));
        launcher.expect_server_pid().return_const(None::<i32>);
        launcher
            .expect_stop()
            .withf(|pid| *pid == 4242)
            .times(1)
            .returning(|_| Ok(None));

        controller.login(&mut launcher, identity(dir.path()), None, None).unwrap();
        assert_eq!(
            controller.on_session_exit(&mut launcher, ChildStatus::Exited(0)),
            None
        );
        assert_eq!(controller.state(), &SessionState::Idle);

        // Exit notification while idle is ignored
        assert_eq!(controller.on_session_exit(&mut launcher, ChildStatus::Exited(0)), None);

        // Idle again, so a new login starts a session
        assert!(matches!(
            controller.login(&mut launcher, identity(dir.path()), None, None).unwrap(),
            LoginResult::Started(_)
        ));
    }

    #[test]
    fn test_session_exit_during_halt() {
        let dir = TempDir::new().unwrap();
        let mut controller = SessionController::new(&config(&dir), Box::new(credentials()))
            .with_runlevel_probe(halting);

        let mut launcher = MockSessionLauncher::new();
        launcher.expect_start_session().returning(|_| Ok(77));
        launcher.expect_server_pid().return_const(None::<i32>);
        launcher.expect_stop().returning(|_| Ok(None));

        controller.login(&mut launcher, identity(dir.path()), None, None).unwrap();
        assert_eq!(
            controller.on_session_exit(&mut launcher, ChildStatus::Exited(0)),
            Some(ExitReason::TerminalRunlevel)
        );
    }

    #[test]
    fn test_spawn_failure_leaves_idle() {
        let dir = TempDir::new().unwrap();
        let mut controller = SessionController::new(&config(&dir), Box::new(credentials()));

        let mut launcher = MockSessionLauncher::new();
        launcher.expect_start_session().returning(|_| {
            Err(crate::supervisor::SupervisorError::InvalidCommand("x".into()))
        });

        assert!(controller
            .login(&mut launcher, identity(dir.path()), None, None)
            .is_err());
        assert!(!controller.is_running());
    }

    #[test]
    fn test_explicit_preferences_written_back() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::write(&cfg.session.system_i18n_file, "LANG=\"en_US.UTF-8\"\n").unwrap();
        let mut controller = SessionController::new(&cfg, Box::new(credentials()));

        let mut launcher = MockSessionLauncher::new();
        launcher
            .expect_start_session()
            .withf(|req| {
                req.session.as_deref() == Some("xfce") && req.lang.as_deref() == Some("en_US.UTF-8")
            })
            .returning(|_| Ok(10));
        launcher.expect_server_pid().return_const(None::<i32>);

        controller
            .login(&mut launcher, identity(dir.path()), Some("xfce"), Some("previous"))
            .unwrap();

        let desktop = std::fs::read_to_string(dir.path().join(".config/desktop")).unwrap();
        assert_eq!(desktop, "DESKTOP=\"xfce\"\n");
        // LANG came from the system file, nothing written for the user
        assert!(!dir.path().join(".config/i18n").exists());
    }

    #[test]
    fn test_open_session_failure_does_not_block_login() {
        let dir = TempDir::new().unwrap();
        let mut store = MockCredentialStore::new();
        store
            .expect_open_session()
            .returning(|_| Err(anyhow::anyhow!("pam_open_session failed")));
        let mut controller = SessionController::new(&config(&dir), Box::new(store));

        let mut launcher = MockSessionLauncher::new();
        launcher.expect_start_session().times(1).returning(|_| Ok(5));
        launcher.expect_server_pid().return_const(None::<i32>);

        assert!(matches!(
            controller.login(&mut launcher, identity(dir.path()), None, None).unwrap(),
            LoginResult::Started(_)
        ));
    }

    #[test]
    fn test_no_autologin_without_configuration() {
        let dir = TempDir::new().unwrap();
        let mut controller = SessionController::new(&config(&dir), Box::new(credentials()));
        let mut launcher = MockSessionLauncher::new();
        assert_eq!(controller.try_autologin(&mut launcher).unwrap(), None);
    }

    #[test]
    fn test_authenticate_delegates() {
        let dir = TempDir::new().unwrap();
        let mut store = MockCredentialStore::new();
        store
            .expect_authenticate()
            .withf(|user, pass| user == "mallory" && pass.as_deref() == Some("guess"))
            .returning(|_, _| AuthOutcome::failed(AuthStatus::BadUser));
        let mut controller = SessionController::new(&config(&dir), Box::new(store));

        let outcome = controller.authenticate("mallory", Some("guess".to_string()));
        assert_eq!(outcome.status, AuthStatus::BadUser);
    }
}
