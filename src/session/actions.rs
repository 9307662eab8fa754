//! Power management commands

use anyhow::{Context, Result};
use std::process::Stdio;
use tracing::info;

use crate::config::CommandsConfig;
use crate::supervisor::display::parse_command;

/// Action a front-end may request instead of a login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    Suspend,
    Shutdown,
    Reboot,
    Exit,
}

impl SystemAction {
    /// Keyword typed at the prompt or sent by the greeter
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "suspend" => Some(Self::Suspend),
            "shutdown" => Some(Self::Shutdown),
            "reboot" => Some(Self::Reboot),
            "exit" | "quit" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// Configured command lines for system actions
#[derive(Debug, Clone)]
pub struct SystemCommands {
    suspend: String,
    shutdown: String,
    reboot: String,
}

impl SystemCommands {
    pub fn new(config: &CommandsConfig) -> Self {
        Self {
            suspend: config.suspend.clone(),
            shutdown: config.shutdown.clone(),
            reboot: config.reboot.clone(),
        }
    }

    /// Command line for `action`; `Exit` has none
    pub fn command_line(&self, action: SystemAction) -> Option<&str> {
        match action {
            SystemAction::Suspend => Some(&self.suspend),
            SystemAction::Shutdown => Some(&self.shutdown),
            SystemAction::Reboot => Some(&self.reboot),
            SystemAction::Exit => None,
        }
    }

    /// Run the command for `action` and wait for it
    pub fn run(&self, action: SystemAction) -> Result<()> {
        let Some(line) = self.command_line(action) else {
            return Ok(());
        };

        info!("Running {:?} command: {}", action, line);
        let status = parse_command(line)?
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("Failed to run {}", line))?;

        if !status.success() {
            anyhow::bail!("{} failed: {}", line, status);
        }
        Ok(())
    }
}
