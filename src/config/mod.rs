//! Configuration management
//!
//! Handles loading and validation of the daemon configuration from a TOML
//! file. Every key has a default, so a missing file or section is not an
//! error; the loader only rejects values the daemon cannot act on.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod types;

pub use types::{
    AuthConfig, CommandsConfig, CoreConfig, LoggingConfig, PromptConfig, SessionConfig,
};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gould/gould.toml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`]
pub const CONFIG_ENV: &str = "GOULD_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core daemon configuration
    #[serde(default)]
    pub core: CoreConfig,
    /// Credential backend configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// User session configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// System commands
    #[serde(default)]
    pub commands: CommandsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Built-in prompt configuration
    #[serde(default)]
    pub prompt: PromptConfig,
}

impl Config {
    /// Path of the configuration file, honoring [`CONFIG_ENV`]
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration, falling back to defaults if the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if shlex::split(&self.core.server).is_none() {
            anyhow::bail!("core.server is not a valid command line: {}", self.core.server);
        }

        if let Some(greeter) = &self.core.greeter {
            match shlex::split(greeter) {
                Some(words) if !words.is_empty() => {}
                _ => anyhow::bail!("core.greeter is not a valid command line: {}", greeter),
            }
        }

        if !self.core.display.starts_with(':') {
            anyhow::bail!("Invalid display name: {}", self.core.display);
        }

        if self.core.reachable_attempts == 0 {
            anyhow::bail!("core.reachable_attempts must be at least 1");
        }

        match self.core.numlock.as_deref() {
            None | Some("on") | Some("off") => {}
            Some(other) => anyhow::bail!("Invalid numlock state: {}", other),
        }

        match self.auth.backend.as_str() {
            "shadow" | "pam" => {}
            other => anyhow::bail!("Invalid auth backend: {}", other),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            other => anyhow::bail!("Invalid log format: {}", other),
        }

        for (name, path) in [
            ("user_desktop_file", &self.session.user_desktop_file),
            ("user_i18n_file", &self.session.user_i18n_file),
        ] {
            let plain = path
                .components()
                .all(|c| matches!(c, std::path::Component::Normal(_)));
            if !plain || path.as_os_str().is_empty() {
                anyhow::bail!("session.{} must be relative to the home directory", name);
            }
        }

        for (name, command) in [
            ("suspend", &self.commands.suspend),
            ("shutdown", &self.commands.shutdown),
            ("reboot", &self.commands.reboot),
        ] {
            if shlex::split(command).map_or(true, |w| w.is_empty()) {
                anyhow::bail!("commands.{} is not a valid command line", name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.core.display, ":0");
        assert_eq!(config.auth.backend, "shadow");
        assert!(config.core.greeter.is_none());
        assert_eq!(config.prompt.tty, PathBuf::from("/dev/tty"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_toml(
            r#"
            [core]
            autologin = "bob"
            greeter = "/usr/libexec/gould-greeter --fullscreen"
            numlock = "on"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.core.autologin.as_deref(), Some("bob"));
        assert_eq!(config.core.numlock.as_deref(), Some("on"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.core.lock, PathBuf::from("/run/gould.pid"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml("[core]\nnumlock = \"maybe\"").is_err());
        assert!(Config::from_toml("[core]\ndisplay = \"0\"").is_err());
        assert!(Config::from_toml("[auth]\nbackend = \"ldap\"").is_err());
        assert!(Config::from_toml("[core]\ngreeter = \"'unterminated\"").is_err());
        assert!(Config::from_toml("[session]\nuser_desktop_file = \"/etc/desktop\"").is_err());
        assert!(Config::from_toml("[session]\nuser_i18n_file = \"../i18n\"").is_err());
    }

    #[test]
    fn test_empty_logging_table_matches_defaults() {
        let config = Config::from_toml("[logging]\n").unwrap();
        assert_eq!(config.logging.file(), Config::default().logging.file());
        assert_eq!(config.logging.file(), Some(Path::new("/var/log/gould.log")));

        let config = Config::from_toml("[logging]\nlog_file = \"\"").unwrap();
        assert_eq!(config.logging.file(), None);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.core.reachable_attempts, 30);
    }
}
