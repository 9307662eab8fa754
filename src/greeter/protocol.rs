//! Greeter pipe protocol
//!
//! UTF-8 text, one command per `\n`-terminated line.
//!
//! Greeter → daemon:
//!
//! ```text
//! login user=<name> pass=<password> [session=<name>] [lang=<locale>]
//! suspend | shutdown | reboot | exit | quit
//! log <free text>
//! ```
//!
//! Daemon → greeter: `reset` (login failed, clear the form) and `exit`.
//!
//! `login` fields are space separated `key=value` tokens, so values cannot
//! contain spaces. Unknown keys are ignored.

use thiserror::Error;

use crate::session::SystemAction;

/// Malformed greeter line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("login without {0}=")]
    MissingField(&'static str),
}

/// Request from the greeter
#[derive(Clone, PartialEq, Eq)]
pub enum GreeterCommand {
    Login {
        user: String,
        pass: String,
        session: Option<String>,
        lang: Option<String>,
    },
    /// `suspend`, `shutdown`, `reboot`, `exit` or `quit`
    Action(SystemAction),
    Log(String),
}

impl std::fmt::Debug for GreeterCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login {
                user,
                session,
                lang,
                ..
            } => f
                .debug_struct("Login")
                .field("user", user)
                .field("pass", &"<redacted>")
                .field("session", session)
                .field("lang", lang)
                .finish(),
            Self::Action(action) => f.debug_tuple("Action").field(action).finish(),
            Self::Log(text) => f.debug_tuple("Log").field(text).finish(),
        }
    }
}

impl GreeterCommand {
    /// Parse one line without its terminator
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (word, rest) = match line.split_once(' ') {
            Some((word, rest)) => (word, rest),
            None => (line, ""),
        };

        match word {
            "" => Err(ProtocolError::Empty),
            "login" => Self::parse_login(rest),
            "log" => Ok(Self::Log(rest.to_string())),
            other => SystemAction::from_keyword(other)
                .map(Self::Action)
                .ok_or_else(|| ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    fn parse_login(fields: &str) -> Result<Self, ProtocolError> {
        let mut user = None;
        let mut pass = None;
        let mut session = None;
        let mut lang = None;

        for token in fields.split(' ').filter(|t| !t.is_empty()) {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let value = value.to_string();
            match key {
                "user" => user = Some(value),
                "pass" => pass = Some(value),
                "session" => session = Some(value),
                "lang" => lang = Some(value),
                _ => {}
            }
        }

        Ok(Self::Login {
            user: user.ok_or(ProtocolError::MissingField("user"))?,
            pass: pass.ok_or(ProtocolError::MissingField("pass"))?,
            session: session.filter(|s| !s.is_empty()),
            lang: lang.filter(|l| !l.is_empty()),
        })
    }
}

/// Notification to the greeter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonCommand {
    Reset,
    Exit,
}

impl DaemonCommand {
    /// Wire form including the terminator
    pub fn as_line(&self) -> &'static str {
        match self {
            Self::Reset => "reset\n",
            Self::Exit => "exit\n",
        }
    }
}

/// Longest accepted greeter line in bytes; longer lines are dropped whole
pub const MAX_LINE: usize = 4096;

/// Reassembles lines from arbitrary read chunks
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
    /// Current line passed `MAX_LINE`; skip to the next newline
    overlong: bool,
    dropped: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if std::mem::take(&mut self.overlong) {
                    self.dropped += 1;
                } else {
                    lines.push(String::from_utf8_lossy(&self.partial).into_owned());
                }
                self.partial.clear();
            } else if self.overlong {
                continue;
            } else if self.partial.len() == MAX_LINE {
                self.overlong = true;
                self.partial = Vec::new();
            } else {
                self.partial.push(b);
            }
        }
        lines
    }

    /// Overlong lines dropped since the last call
    pub fn take_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    /// End of stream: drop any unterminated line, returning its buffered length
    pub fn finish(&mut self) -> usize {
        let len = self.partial.len();
        self.partial.clear();
        self.overlong = false;
        len
    }
}
