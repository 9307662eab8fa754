//! X display naming and server command construction

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::error::{Result, SupervisorError};

/// Fallback server binary when the configured command line is empty
pub const DEFAULT_SERVER: &str = "/usr/bin/X";

/// Local X display such as `:0` or `:1.0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Display {
    name: String,
    number: String,
}

impl Display {
    /// Parse a local display name
    pub fn parse(name: &str) -> Result<Self> {
        let rest = name
            .strip_prefix(':')
            .ok_or_else(|| SupervisorError::InvalidDisplay(name.to_string()))?;
        let number = rest.split('.').next().unwrap_or_default();

        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SupervisorError::InvalidDisplay(name.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            number: number.to_string(),
        })
    }

    /// Value for `DISPLAY`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display number as used in Xauthority records
    pub fn number(&self) -> &str {
        &self.number
    }

    /// Server's local listening socket
    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(format!("/tmp/.X11-unix/X{}", self.number))
    }

    /// Whether the server accepts connections right now
    pub fn is_reachable(&self) -> bool {
        std::os::unix::net::UnixStream::connect(self.socket_path()).is_ok()
    }
}

/// Build the X server invocation
///
/// The display name is inserted after the binary unless the command line
/// already names one, and `-auth <file>` is always appended.
pub fn server_command(command_line: &str, display: &Display, authfile: &Path) -> Result<Command> {
    let mut words = shlex::split(command_line)
        .ok_or_else(|| SupervisorError::InvalidCommand(command_line.to_string()))?;
    if words.is_empty() {
        words.push(DEFAULT_SERVER.to_string());
    }

    let program = words.remove(0);
    let mut cmd = Command::new(program);

    if !words.iter().any(|w| w.starts_with(':')) {
        cmd.arg(display.name());
    }
    cmd.args(&words)
        .arg("-auth")
        .arg(authfile)
        .stdin(Stdio::null());

    Ok(cmd)
}

/// Build a plain command from a shell-style command line
pub fn parse_command(command_line: &str) -> Result<Command> {
    let words = shlex::split(command_line)
        .filter(|w| !w.is_empty())
        .ok_or_else(|| SupervisorError::InvalidCommand(command_line.to_string()))?;
    let mut cmd = Command::new(&words[0]);
    cmd.args(&words[1..]);
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_parse_display() {
        let display = Display::parse(":0").unwrap();
        assert_eq!(display.number(), "0");
        assert_eq!(display.socket_path(), PathBuf::from("/tmp/.X11-unix/X0"));

        assert_eq!(Display::parse(":12.0").unwrap().number(), "12");
        assert!(Display::parse("0").is_err());
        assert!(Display::parse(":").is_err());
        assert!(Display::parse(":x").is_err());
    }

    #[test]
    fn test_server_command_inserts_display() {
        let display = Display::parse(":1").unwrap();
        let cmd = server_command("/usr/bin/X -nolisten tcp", &display, Path::new("/run/a")).unwrap();

        assert_eq!(cmd.get_program(), "/usr/bin/X");
        assert_eq!(args(&cmd), vec![":1", "-nolisten", "tcp", "-auth", "/run/a"]);
    }

    #[test]
    fn test_server_command_keeps_explicit_display() {
        let display = Display::parse(":0").unwrap();
        let cmd = server_command("Xorg :3 vt7", &display, Path::new("/run/a")).unwrap();
        assert_eq!(args(&cmd), vec![":3", "vt7", "-auth", "/run/a"]);
    }

    #[test]
    fn test_empty_server_falls_back() {
        let display = Display::parse(":0").unwrap();
        let cmd = server_command("", &display, Path::new("/run/a")).unwrap();
        assert_eq!(cmd.get_program(), DEFAULT_SERVER);
    }

    #[test]
    fn test_parse_command() {
        let cmd = parse_command("/sbin/shutdown -h now").unwrap();
        assert_eq!(cmd.get_program(), "/sbin/shutdown");
        assert_eq!(args(&cmd), vec!["-h", "now"]);
        assert!(parse_command("").is_err());
        assert!(parse_command("'open").is_err());
    }
}
