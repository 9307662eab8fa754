//! Startup failure reports
//!
//! A display manager that cannot come up is usually stuck on one of a few
//! things: its configuration, another instance holding the lock, an X
//! server that never answers, or an account database it cannot read. The
//! report names which one, prints the error chain and the checks that
//! usually resolve it.

use std::fmt::Write;

use crate::auth::AuthError;
use crate::supervisor::SupervisorError;

/// Why gould could not start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Configuration file unreadable or invalid
    Config,
    /// Another live instance holds the lock file
    LockHeld,
    /// X server failed to start or never accepted connections
    DisplayUnreachable,
    /// passwd/shadow (or PAM) could not be consulted
    AuthStoreUnreadable,
    /// Anything else
    Other,
}

impl Failure {
    /// Classify an error chain, typed causes first, then message text
    pub fn classify(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(e) = cause.downcast_ref::<SupervisorError>() {
                match e {
                    SupervisorError::AlreadyRunning(_) => return Self::LockHeld,
                    SupervisorError::DisplayUnreachable { .. }
                    | SupervisorError::DisplayServerDied
                    | SupervisorError::InvalidDisplay(_) => return Self::DisplayUnreachable,
                    _ => {}
                }
            }
            if cause.is::<AuthError>() {
                return Self::AuthStoreUnreadable;
            }
            if cause.is::<toml::de::Error>() {
                return Self::Config;
            }
        }

        let text = format!("{:#}", error).to_lowercase();
        if text.contains("config") {
            Self::Config
        } else if text.contains("lock") || text.contains("already running") {
            Self::LockHeld
        } else if text.contains("x server") || text.contains("display") {
            Self::DisplayUnreachable
        } else if ["shadow", "passwd", "pam"].iter().any(|w| text.contains(w)) {
            Self::AuthStoreUnreadable
        } else {
            Self::Other
        }
    }

    fn summary(self) -> &'static str {
        match self {
            Self::Config => "invalid configuration",
            Self::LockHeld => "another instance is already running",
            Self::DisplayUnreachable => "the X server could not be reached",
            Self::AuthStoreUnreadable => "the account database is unreadable",
            Self::Other => "startup failed",
        }
    }

    fn hints(self) -> &'static [&'static str] {
        match self {
            Self::Config => &[
                "check /etc/gould/gould.toml (or $GOULD_CONFIG) for TOML syntax errors",
                "core.server and core.greeter need balanced quotes",
                "core.display looks like ':0', core.numlock is 'on' or 'off'",
            ],
            Self::LockHeld => &[
                "see which instance holds it: pgrep -a gould",
                "a stale lock from a crashed instance is reclaimed automatically",
                "core.lock must be in a directory gould can write",
            ],
            Self::DisplayUnreachable => &[
                "core.server must point at an X server binary (default /usr/bin/X)",
                "make sure no other server owns the display (/tmp/.X<n>-lock)",
                "the server's own log is usually /var/log/Xorg.<n>.log",
                "slow GPUs may need a larger core.reachable_attempts",
            ],
            Self::AuthStoreUnreadable => &[
                "gould has to run as root to read auth.shadow_file",
                "with auth.backend = \"pam\", /etc/pam.d/<auth.pam_service> must exist",
            ],
            Self::Other => &[
                "run in the foreground (without -d) to see every message",
                "raise the log level: RUST_LOG=gould=debug",
            ],
        }
    }
}

/// Render a fatal error for the terminal
pub fn format_user_error(error: &anyhow::Error) -> String {
    let failure = Failure::classify(error);
    let mut out = String::new();

    let _ = writeln!(out, "gould: {}", failure.summary());
    for (depth, cause) in error.chain().enumerate() {
        let label = if depth == 0 { "error" } else { "cause" };
        let _ = writeln!(out, "  {}: {}", label, cause);
    }

    let _ = writeln!(out, "\nTry:");
    for hint in failure.hints() {
        let _ = writeln!(out, "  - {}", hint);
    }
    out
}
