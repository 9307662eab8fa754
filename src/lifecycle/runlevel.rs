//! SysV runlevel probe

use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Default location of the `runlevel` tool
pub const RUNLEVEL_COMMAND: &str = "/sbin/runlevel";

/// Current system runlevel as far as we can tell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runlevel {
    /// Runlevel 0
    Halt,
    /// Runlevel 6
    Reboot,
    /// Any other runlevel
    Other(String),
    /// Could not be determined
    Unknown,
}

impl Runlevel {
    /// Parse `runlevel` output such as `N 5`; the last token is current
    pub fn parse(output: &str) -> Self {
        match output.split_whitespace().last() {
            Some("0") => Self::Halt,
            Some("6") => Self::Reboot,
            Some("unknown") | None => Self::Unknown,
            Some(other) => Self::Other(other.to_string()),
        }
    }

    /// Ask the system
    pub fn current() -> Self {
        Self::query(Path::new(RUNLEVEL_COMMAND))
    }

    /// Run `command` and parse its output
    pub fn query(command: &Path) -> Self {
        let output = Command::new(command)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(out) => {
                let level = Self::parse(&String::from_utf8_lossy(&out.stdout));
                debug!("Runlevel: {:?}", level);
                level
            }
            Err(e) => {
                debug!("Could not run {}: {}", command.display(), e);
                Self::Unknown
            }
        }
    }

    /// System is going down: halt or reboot
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Halt | Self::Reboot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Runlevel::parse("N 5\n"), Runlevel::Other("5".to_string()));
        assert_eq!(Runlevel::parse("5 0"), Runlevel::Halt);
        assert_eq!(Runlevel::parse("3 6\n"), Runlevel::Reboot);
        assert_eq!(Runlevel::parse("unknown"), Runlevel::Unknown);
        assert_eq!(Runlevel::parse(""), Runlevel::Unknown);
    }

    #[test]
    fn test_terminal() {
        assert!(Runlevel::Halt.is_terminal());
        assert!(Runlevel::Reboot.is_terminal());
        assert!(!Runlevel::Other("5".into()).is_terminal());
        assert!(!Runlevel::Unknown.is_terminal());
    }

    #[test]
    fn test_missing_tool_is_unknown() {
        assert_eq!(
            Runlevel::query(Path::new("/nonexistent/runlevel")),
            Runlevel::Unknown
        );
    }
}
