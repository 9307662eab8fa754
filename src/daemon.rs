//! Daemon context and event loop
//!
//! [`Daemon`] owns every component. [`Daemon::run`] performs the ordered
//! startup, dispatches events until something ends the run and always
//! finishes with the same cleanup, returning the [`ExitReason`] for the
//! restart policy.
//!
//! ```text
//! lock → cookie → X server → reachable → autologin? → greeter | prompt
//!                                              ↑                 │
//!                                              └─ session exit ←─┘ login
//! ```

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::auth::{create_credential_store, UserIdentity};
use crate::config::Config;
use crate::greeter::{DaemonCommand, GreeterChannel, GreeterCommand, GREETER_LOG_TARGET};
use crate::lifecycle::{crash, ExitReason, RestartPolicy, SignalEvent, SignalManager};
use crate::prompt::tty::Terminal;
use crate::prompt::{Key, LoginPrompt, PromptAction};
use crate::session::{LoginResult, SessionController};
use crate::supervisor::{
    AutologinSlot, ChildExit, ChildRole, LockFile, LockStatus, ProcessSupervisor, SupervisorError,
};
use crate::utils::format_user_error;

/// Active login front-end
enum Frontend {
    /// A session is running, or nothing could be started
    None,
    Greeter(GreeterChannel),
    Prompt {
        prompt: LoginPrompt,
        terminal: Option<Terminal>,
    },
}

/// Input from whichever front-end is active
enum FrontendInput {
    Greeter(Option<GreeterCommand>),
    Keys(Result<Vec<Key>>),
}

enum Event {
    Signal(SignalEvent),
    Input(FrontendInput),
}

async fn next_input(frontend: &mut Frontend) -> FrontendInput {
    match frontend {
        Frontend::Greeter(channel) if channel.is_alive() => {
            FrontendInput::Greeter(channel.next_command().await)
        }
        Frontend::Prompt {
            terminal: Some(terminal),
            ..
        } => FrontendInput::Keys(terminal.next_keys().await),
        _ => std::future::pending().await,
    }
}

/// Log a startup failure and print its report on stderr
fn report_failure(error: anyhow::Error) {
    error!("{:#}", error);
    eprint!("{}", format_user_error(&error));
}

/// Display manager daemon
pub struct Daemon {
    config: Config,
    lock: LockFile,
    supervisor: ProcessSupervisor,
    controller: SessionController,
    frontend: Frontend,
    policy: RestartPolicy,
}

impl Daemon {
    /// Build all components; nothing is started yet
    pub fn new(config: Config) -> Result<Self> {
        let lock = LockFile::for_current_exe(config.core.lock.clone());
        let supervisor = ProcessSupervisor::new(&config).context("Invalid display configuration")?;

        let store = create_credential_store(&config.auth);
        store.check().context("Authentication store unusable")?;

        let mut controller = SessionController::new(&config, store);
        if config.core.autologin.is_some() {
            match AutologinSlot::open(config.core.autologin_key) {
                Ok(slot) => controller = controller.with_autologin_slot(slot),
                Err(e) => warn!("Autologin slot unavailable: {}", e),
            }
        }

        let policy = RestartPolicy::from_env(config.core.max_respawns);

        Ok(Self {
            config,
            lock,
            supervisor,
            controller,
            frontend: Frontend::None,
            policy,
        })
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Run until something ends the daemon, then clean up
    ///
    /// Must be called on a single-threaded tokio runtime.
    pub async fn run(&mut self) -> ExitReason {
        info!("════════════════════════════════════════════════════════");
        info!("  gould v{} on {}", env!("CARGO_PKG_VERSION"), self.config.core.display);
        info!("  Commit: {}", env!("GOULD_COMMIT"));
        info!("  Server: {}", self.config.core.server);
        info!(
            "  Front-end: {}",
            self.config.core.greeter.as_deref().unwrap_or("built-in prompt")
        );
        if self.policy.respawns() > 0 {
            info!("  Consecutive respawn: {}", self.policy.respawns());
        }
        info!("════════════════════════════════════════════════════════");

        let mut signals = match SignalManager::install() {
            Ok(signals) => signals,
            Err(e) => {
                error!("{:#}", e);
                return ExitReason::Fatal;
            }
        };

        match self.lock.acquire() {
            Ok(LockStatus::Acquired) => {}
            Ok(LockStatus::AlreadyRunning(pid)) => {
                report_failure(SupervisorError::AlreadyRunning(pid).into());
                return ExitReason::AlreadyRunning;
            }
            Err(e) => {
                let lock = self.lock.path().display().to_string();
                report_failure(anyhow::Error::new(e).context(format!("Cannot take lock {}", lock)));
                return ExitReason::Fatal;
            }
        }

        if let Err(e) = crash::install(
            self.lock.path(),
            self.policy.respawns(),
            self.config.core.max_respawns,
        ) {
            warn!("Crash hook not installed: {:#}", e);
        }

        let reason = match self.startup().await {
            Ok(()) => self.event_loop(&mut signals).await,
            Err(reason) => reason,
        };

        info!("Leaving: {}", reason);
        self.cleanup().await;
        reason
    }

    async fn startup(&mut self) -> std::result::Result<(), ExitReason> {
        if let Err(e) = self.supervisor.start_display_server(&self.config.core.server) {
            error!("Failed to start X server: {}", e);
            return Err(ExitReason::Fatal);
        }

        let interval = Duration::from_millis(self.config.core.reachable_interval_ms);
        match self
            .supervisor
            .wait_reachable(self.config.core.reachable_attempts, interval)
        {
            Ok(()) => {}
            Err(e @ (SupervisorError::DisplayUnreachable { .. } | SupervisorError::DisplayServerDied)) => {
                report_failure(e.into());
                return Err(ExitReason::DisplayUnreachable);
            }
            Err(e) => {
                error!("Waiting for display failed: {}", e);
                return Err(ExitReason::Fatal);
            }
        }

        if let Some(state) = self.config.core.numlock.as_deref() {
            self.supervisor.set_numlock(state);
        }

        match self.controller.try_autologin(&mut self.supervisor) {
            Ok(Some(LoginResult::Started(_))) => {}
            Ok(_) => self.start_frontend(),
            Err(e) => {
                warn!("Autologin failed: {:#}", e);
                self.start_frontend();
            }
        }
        Ok(())
    }

    async fn event_loop(&mut self, signals: &mut SignalManager) -> ExitReason {
        loop {
            let event = tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => Event::Signal(signal),
                    None => return ExitReason::Fatal,
                },
                input = next_input(&mut self.frontend) => Event::Input(input),
            };

            let outcome = match event {
                Event::Signal(SignalEvent::Routed(sig)) => {
                    info!("Received signal {}", sig);
                    Some(ExitReason::Signal(sig))
                }
                Event::Signal(SignalEvent::Child) => self.handle_child_exits().await,
                Event::Input(FrontendInput::Greeter(command)) => self.handle_greeter(command).await,
                Event::Input(FrontendInput::Keys(keys)) => self.handle_keys(keys).await,
            };

            if let Some(reason) = outcome {
                return reason;
            }
        }
    }

    async fn handle_child_exits(&mut self) -> Option<ExitReason> {
        for ChildExit { pid, status } in self.supervisor.reap() {
            match self.supervisor.role_of(pid) {
                Some(ChildRole::DisplayServer) => {
                    warn!("X server (PID: {}) exited ({})", pid, status);
                    return Some(ExitReason::DisplayServerExited);
                }
                Some(ChildRole::Session) => {
                    if let Some(reason) = self.controller.on_session_exit(&mut self.supervisor, status) {
                        return Some(reason);
                    }
                    self.start_frontend();
                }
                Some(ChildRole::Greeter) => {
                    warn!("Greeter (PID: {}) exited ({})", pid, status);
                    if let Frontend::Greeter(channel) = &mut self.frontend {
                        channel.mark_dead();
                    }
                    if let Err(e) = self.supervisor.stop(pid) {
                        warn!("Failed to tear down greeter group {}: {}", pid, e);
                    }
                }
                None => debug!("Reaped child {} ({})", pid, status),
            }
        }
        None
    }

    async fn handle_greeter(&mut self, command: Option<GreeterCommand>) -> Option<ExitReason> {
        let Frontend::Greeter(channel) = &mut self.frontend else {
            return None;
        };

        let Some(command) = command else {
            warn!("Greeter closed its pipe, tearing it down");
            channel.mark_dead();
            let pid = channel.pid();
            if let Err(e) = self.supervisor.stop(pid) {
                warn!("Failed to stop greeter {}: {}", pid, e);
            }
            return None;
        };

        match command {
            GreeterCommand::Login {
                user,
                pass,
                session,
                lang,
            } => {
                let outcome = self.controller.authenticate(&user, Some(pass));
                let success = outcome.is_success();
                match outcome.identity.filter(|_| success) {
                    Some(identity) => {
                        self.stop_frontend().await;
                        self.login(identity, session.as_deref(), lang.as_deref());
                    }
                    None => {
                        if let Err(e) = channel.send(DaemonCommand::Reset).await {
                            warn!("{:#}", e);
                        }
                    }
                }
                None
            }
            GreeterCommand::Action(action) => self.controller.system_action(action),
            GreeterCommand::Log(text) => {
                info!(target: GREETER_LOG_TARGET, "{}", text);
                None
            }
        }
    }

    async fn handle_keys(&mut self, keys: Result<Vec<Key>>) -> Option<ExitReason> {
        let Frontend::Prompt { prompt, terminal } = &mut self.frontend else {
            return None;
        };

        let keys = match keys {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Prompt input lost: {:#}", e);
                *terminal = None;
                return None;
            }
        };

        for key in keys {
            match prompt.handle(key) {
                PromptAction::None => {}
                PromptAction::Redraw => {
                    if let Some(terminal) = terminal.as_mut() {
                        terminal.render(prompt);
                    }
                }
                PromptAction::Submit {
                    user,
                    pass,
                    session,
                } => {
                    let outcome = self.controller.authenticate(&user, Some(pass));
                    let success = outcome.is_success();
                    prompt.finish(success);

                    if let Some(identity) = outcome.identity.filter(|_| success) {
                        self.stop_frontend().await;
                        self.login(identity, session.as_deref(), None);
                        return None;
                    }
                    if let Some(terminal) = terminal.as_mut() {
                        terminal.render(prompt);
                    }
                }
                PromptAction::System(action) => {
                    prompt.finish(true);
                    if let Some(terminal) = terminal.as_mut() {
                        terminal.message(&format!("{:?}", action).to_lowercase());
                    }
                    if let Some(reason) = self.controller.system_action(action) {
                        return Some(reason);
                    }
                }
            }
        }
        None
    }

    fn login(&mut self, identity: UserIdentity, session: Option<&str>, lang: Option<&str>) {
        match self.controller.login(&mut self.supervisor, identity, session, lang) {
            Ok(LoginResult::Started(_)) => {}
            Ok(LoginResult::AlreadyRunning) => debug!("Login ignored, session already running"),
            Err(e) => {
                error!("{:#}", e);
                self.start_frontend();
            }
        }
    }

    fn start_frontend(&mut self) {
        if let Some(command) = self.config.core.greeter.clone() {
            match GreeterChannel::spawn(&mut self.supervisor, &command) {
                Ok(channel) => {
                    self.frontend = Frontend::Greeter(channel);
                    return;
                }
                Err(e) => warn!("{:#} - falling back to the built-in prompt", e),
            }
        }

        let mut prompt = LoginPrompt::new(self.config.session.xsessions_dir.clone());
        if self.config.prompt.prefill_user {
            if let Some(user) = self.controller.last_user() {
                prompt.prefill(&user);
            }
        }

        let terminal = match Terminal::open(&self.config.prompt.tty) {
            Ok(mut terminal) => {
                terminal.render(&mut prompt);
                Some(terminal)
            }
            Err(e) => {
                warn!("Built-in prompt unavailable: {:#}", e);
                None
            }
        };
        self.frontend = Frontend::Prompt { prompt, terminal };
    }

    async fn stop_frontend(&mut self) {
        match std::mem::replace(&mut self.frontend, Frontend::None) {
            Frontend::Greeter(channel) => channel.shutdown(&mut self.supervisor).await,
            Frontend::Prompt { .. } | Frontend::None => {}
        }
    }

    async fn cleanup(&mut self) {
        self.stop_frontend().await;
        self.controller.stop_session(&mut self.supervisor);
        self.supervisor.terminate_all();

        self.lock.release();
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{killpg, Signal};
    use nix::sys::wait::waitpid;
    use nix::unistd::Pid;
    use std::path::Path;
    use tempfile::TempDir;

    fn config_in(dir: &Path, greeter: String) -> Config {
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        std::fs::write(
            dir.join("passwd"),
            format!("bob:x:{}:{}::{}:/bin/sh\n", uid, gid, dir.display()),
        )
        .unwrap();
        std::fs::write(dir.join("shadow"), "bob::19000:0:99999:7:::\n").unwrap();

        let mut config = Config::default();
        config.core.greeter = Some(greeter);
        config.core.lock = dir.join("gould.pid");
        config.core.authfile = dir.join("auth");
        config.auth.passwd_file = dir.join("passwd");
        config.auth.shadow_file = dir.join("shadow");
        config.session.cache_file = dir.join("last-user");
        config.prompt.tty = dir.join("no-tty");
        config
    }

    #[test]
    fn test_unreadable_account_database_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path(), "true".into());
        config.auth.shadow_file = dir.path().join("missing-shadow");

        let err = Daemon::new(config).err().unwrap();
        assert!(format!("{:#}", err).contains("missing-shadow"));
    }

    #[tokio::test]
    async fn test_greeter_login_failure_resets_form() {
        let dir = TempDir::new().unwrap();
        let reply = dir.path().join("reply");
        let greeter = format!(
            "sh -c 'echo \"login user=bob pass=wrong\"; read answer; echo \"$answer\" > {}; sleep 30'",
            reply.display()
        );
        let mut daemon = Daemon::new(config_in(dir.path(), greeter)).unwrap();

        daemon.start_frontend();
        let Frontend::Greeter(channel) = &mut daemon.frontend else {
            panic!("greeter did not start");
        };
        let pid = channel.pid();

        let command = tokio::time::timeout(Duration::from_secs(5), channel.next_command())
            .await
            .unwrap();
        assert!(matches!(command, Some(GreeterCommand::Login { .. })));

        // Rejected: no session, greeter kept and told to clear its form
        assert_eq!(daemon.handle_greeter(command).await, None);
        assert_eq!(daemon.controller.session_pid(), None);
        assert!(matches!(&daemon.frontend, Frontend::Greeter(c) if c.is_alive()));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if std::fs::read_to_string(&reply).is_ok_and(|r| r == "reset\n") {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "greeter got no reset");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        let _ = waitpid(Pid::from_raw(pid), None);
    }
}
