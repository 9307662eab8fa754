//! Terminal front-end for the login prompt

use anyhow::{Context, Result};
use nix::sys::termios::{self, SetArg, Termios};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

use super::keys::{Key, KeyDecoder};
use super::LoginPrompt;

/// Controlling terminal
pub const DEFAULT_TTY: &str = "/dev/tty";

/// Raw-mode terminal delivering key events
///
/// The original terminal settings are restored on drop.
pub struct Terminal {
    fd: AsyncFd<File>,
    saved: Option<Termios>,
    decoder: KeyDecoder,
}

impl Terminal {
    /// Open `path` and switch it to raw mode
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let saved = match termios::tcgetattr(&file) {
            Ok(saved) => {
                let mut raw = saved.clone();
                termios::cfmakeraw(&mut raw);
                termios::tcsetattr(&file, SetArg::TCSANOW, &raw)
                    .context("Failed to enter raw mode")?;
                Some(saved)
            }
            Err(e) => {
                warn!("{} is not a terminal ({}), reading it as is", path.display(), e);
                None
            }
        };

        debug!("Prompt terminal {} opened", path.display());
        Ok(Self {
            fd: AsyncFd::new(file).context("Failed to register terminal")?,
            saved,
            decoder: KeyDecoder::new(),
        })
    }

    /// Wait for input and decode it
    ///
    /// Cancel safe. End of input is an error.
    pub async fn next_keys(&mut self) -> Result<Vec<Key>> {
        let mut buf = [0u8; 64];
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(&mut buf)
            }) {
                Ok(Ok(0)) => anyhow::bail!("Terminal closed"),
                Ok(Ok(n)) => return Ok(self.decoder.feed(&buf[..n])),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e).context("Failed to read terminal"),
                Err(_would_block) => continue,
            }
        }
    }

    /// Draw any pending status message and the current prompt line
    pub fn render(&mut self, prompt: &mut LoginPrompt) {
        let mut out = String::from("\r\x1b[2K");
        if let Some(status) = prompt.take_status() {
            out.push_str(&status);
            out.push_str("\r\n");
        }
        out.push_str(&prompt.prompt_line());
        self.write(out.as_bytes());
    }

    /// Print a line above the prompt
    pub fn message(&mut self, text: &str) {
        self.write(format!("\r\x1b[2K{}\r\n", text).as_bytes());
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut file: &File = self.fd.get_ref();
        if let Err(e) = file.write_all(bytes).and_then(|_| file.flush()) {
            debug!("Terminal write failed: {}", e);
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.write(b"\r\n");
            if let Err(e) = termios::tcsetattr(self.fd.get_ref(), SetArg::TCSANOW, &saved) {
                warn!("Failed to restore terminal settings: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keys_from_fifo() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("input");
        nix::unistd::mkfifo(&path, nix::sys::stat::Mode::S_IRWXU).unwrap();

        let mut terminal = Terminal::open(&path).unwrap();
        assert!(terminal.saved.is_none());

        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"bob\r").unwrap();
        assert_eq!(
            terminal.next_keys().await.unwrap(),
            vec![Key::Char('b'), Key::Char('o'), Key::Char('b'), Key::Enter]
        );
    }
}
