//! Built-in login prompt
//!
//! Used when no external greeter is configured. [`LoginPrompt`] is a pure
//! state machine over decoded [`Key`]s; [`tty::Terminal`] feeds it from the
//! controlling terminal and draws its prompts.
//!
//! ```text
//! CollectUser --Enter--> CollectPass --Enter--> Authenticating
//!      ^   \--Enter on reboot/shutdown/exit--> Authenticating (System)
//!      |                                              |
//!      +------------------- finish() -----------------+
//! ```

use std::path::PathBuf;

use crate::session::desktops::{self, DesktopSession};
use crate::session::SystemAction;

pub mod keys;
pub mod tty;

pub use keys::{Key, KeyDecoder};

/// Status shown after any failed login
pub const LOGIN_INCORRECT: &str = "Login incorrect";

/// Where the prompt is in the login sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CollectUser,
    CollectPass,
    Authenticating,
}

/// What the caller should do after a key
#[derive(Clone, PartialEq, Eq)]
pub enum PromptAction {
    /// Nothing changed
    None,
    /// Visible state changed
    Redraw,
    /// Credentials complete
    Submit {
        user: String,
        pass: String,
        session: Option<String>,
    },
    /// A system keyword was entered as the user name
    System(SystemAction),
}

impl std::fmt::Debug for PromptAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Redraw => f.write_str("Redraw"),
            Self::Submit { user, session, .. } => f
                .debug_struct("Submit")
                .field("user", user)
                .field("session", session)
                .finish_non_exhaustive(),
            Self::System(action) => f.debug_tuple("System").field(action).finish(),
        }
    }
}

/// Three-stage login prompt
#[derive(Debug)]
pub struct LoginPrompt {
    stage: Stage,
    user: String,
    pass: String,
    status: Option<String>,
    xsessions_dir: PathBuf,
    sessions: Option<Vec<DesktopSession>>,
    selected: Option<usize>,
}

impl LoginPrompt {
    pub fn new(xsessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            stage: Stage::CollectUser,
            user: String::new(),
            pass: String::new(),
            status: None,
            xsessions_dir: xsessions_dir.into(),
            sessions: None,
            selected: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Pending transient message
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Take the transient message for display
    pub fn take_status(&mut self) -> Option<String> {
        self.status.take()
    }

    /// Pre-fill the user name
    pub fn prefill(&mut self, user: &str) {
        if self.stage == Stage::CollectUser {
            self.user = user.to_string();
        }
    }

    /// Selected desktop session id
    pub fn selected_session(&self) -> Option<&str> {
        let index = self.selected?;
        self.sessions.as_ref()?.get(index).map(|s| s.id.as_str())
    }

    /// Prompt text for the current stage; the password is masked
    pub fn prompt_line(&self) -> String {
        match self.stage {
            Stage::CollectUser => format!("login: {}", self.user),
            Stage::CollectPass => format!("password: {}", "*".repeat(self.pass.chars().count())),
            Stage::Authenticating => String::new(),
        }
    }

    /// Process one key
    pub fn handle(&mut self, key: Key) -> PromptAction {
        if key == Key::F1 {
            return self.cycle_session();
        }

        match self.stage {
            Stage::CollectUser => self.handle_user(key),
            Stage::CollectPass => self.handle_pass(key),
            Stage::Authenticating => PromptAction::None,
        }
    }

    /// Authentication is over; back to the user name
    pub fn finish(&mut self, success: bool) {
        self.stage = Stage::CollectUser;
        self.user.clear();
        self.pass.clear();
        self.status = if success {
            None
        } else {
            Some(LOGIN_INCORRECT.to_string())
        };
    }

    fn handle_user(&mut self, key: Key) -> PromptAction {
        match key {
            Key::Char(c) => {
                self.user.push(c);
                PromptAction::Redraw
            }
            Key::Backspace => {
                if self.user.pop().is_some() {
                    PromptAction::Redraw
                } else {
                    PromptAction::None
                }
            }
            Key::Escape => {
                self.reset();
                PromptAction::Redraw
            }
            Key::Enter if self.user.is_empty() => PromptAction::None,
            Key::Enter => {
                let action = match self.user.as_str() {
                    "reboot" => Some(SystemAction::Reboot),
                    "shutdown" => Some(SystemAction::Shutdown),
                    "exit" => Some(SystemAction::Exit),
                    _ => None,
                };
                match action {
                    Some(action) => {
                        self.stage = Stage::Authenticating;
                        PromptAction::System(action)
                    }
                    None => {
                        self.stage = Stage::CollectPass;
                        PromptAction::Redraw
                    }
                }
            }
            Key::F1 => PromptAction::None,
        }
    }

    fn handle_pass(&mut self, key: Key) -> PromptAction {
        match key {
            Key::Char(c) => {
                self.pass.push(c);
                PromptAction::Redraw
            }
            Key::Backspace => {
                if self.pass.pop().is_some() {
                    PromptAction::Redraw
                } else {
                    PromptAction::None
                }
            }
            Key::Escape => {
                self.reset();
                PromptAction::Redraw
            }
            Key::Enter => {
                self.stage = Stage::Authenticating;
                PromptAction::Submit {
                    user: self.user.clone(),
                    pass: std::mem::take(&mut self.pass),
                    session: self.selected_session().map(str::to_string),
                }
            }
            Key::F1 => PromptAction::None,
        }
    }

    fn reset(&mut self) {
        self.stage = Stage::CollectUser;
        self.user.clear();
        self.pass.clear();
        self.status = None;
    }

    fn cycle_session(&mut self) -> PromptAction {
        if self.stage == Stage::Authenticating {
            return PromptAction::None;
        }
        let dir = &self.xsessions_dir;
        let sessions = self.sessions.get_or_insert_with(|| desktops::scan(dir));
        if sessions.is_empty() {
            return PromptAction::None;
        }

        let next = self.selected.map_or(0, |i| (i + 1) % sessions.len());
        self.status = Some(format!("Session: {}", sessions[next].name));
        self.selected = Some(next);
        PromptAction::Redraw
    }
}
