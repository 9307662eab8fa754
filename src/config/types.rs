//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Core daemon configuration (`[core]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// User to log in automatically at startup
    #[serde(default)]
    pub autologin: Option<String>,

    /// Password for the autologin user (discouraged, empty password is used when unset)
    #[serde(default)]
    pub password: Option<String>,

    /// X server command line (display and `-auth` are handled by the daemon)
    #[serde(default = "default_server")]
    pub server: String,

    /// Greeter command line (None = built-in terminal prompt)
    #[serde(default)]
    pub greeter: Option<String>,

    /// PATH exported to user sessions
    #[serde(default)]
    pub path: Option<String>,

    /// Single-instance lock file
    #[serde(default = "default_lock")]
    pub lock: PathBuf,

    /// NumLock state applied once the display is up ("on" / "off")
    #[serde(default)]
    pub numlock: Option<String>,

    /// X authority file handed to the server
    #[serde(default = "default_authfile")]
    pub authfile: PathBuf,

    /// X display name
    #[serde(default = "default_display")]
    pub display: String,

    /// System V IPC key of the autologin semaphore
    #[serde(default = "default_autologin_key")]
    pub autologin_key: i32,

    /// Connection attempts before the display is declared unreachable
    #[serde(default = "default_reachable_attempts")]
    pub reachable_attempts: u32,

    /// Delay between connection attempts (milliseconds)
    #[serde(default = "default_reachable_interval_ms")]
    pub reachable_interval_ms: u64,

    /// Consecutive respawns allowed before giving up
    #[serde(default = "default_max_respawns")]
    pub max_respawns: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            autologin: None,
            password: None,
            server: default_server(),
            greeter: None,
            path: None,
            lock: default_lock(),
            numlock: None,
            authfile: default_authfile(),
            display: default_display(),
            autologin_key: default_autologin_key(),
            reachable_attempts: default_reachable_attempts(),
            reachable_interval_ms: default_reachable_interval_ms(),
            max_respawns: default_max_respawns(),
        }
    }
}

fn default_server() -> String {
    "/usr/bin/X -nolisten tcp".to_string()
}

fn default_lock() -> PathBuf {
    PathBuf::from("/run/gould.pid")
}

fn default_authfile() -> PathBuf {
    PathBuf::from("/run/gould.auth")
}

fn default_display() -> String {
    ":0".to_string()
}

fn default_autologin_key() -> i32 {
    // "GoUl"
    0x476f_556c
}

fn default_reachable_attempts() -> u32 {
    30
}

fn default_reachable_interval_ms() -> u64 {
    500
}

fn default_max_respawns() -> u32 {
    5
}

/// Credential backend configuration (`[auth]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Backend ("shadow", "pam")
    #[serde(default = "default_backend")]
    pub backend: String,

    /// PAM service name
    #[serde(default = "default_pam_service")]
    pub pam_service: String,

    /// Account database
    #[serde(default = "default_passwd_file")]
    pub passwd_file: PathBuf,

    /// Shadow password database
    #[serde(default = "default_shadow_file")]
    pub shadow_file: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            pam_service: default_pam_service(),
            passwd_file: default_passwd_file(),
            shadow_file: default_shadow_file(),
        }
    }
}

fn default_backend() -> String {
    "shadow".to_string()
}

fn default_pam_service() -> String {
    "gould".to_string()
}

fn default_passwd_file() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_shadow_file() -> PathBuf {
    PathBuf::from("/etc/shadow")
}

/// User session configuration (`[session]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Launcher script executed with the session name
    #[serde(default = "default_launcher")]
    pub launcher: PathBuf,

    /// Directory holding desktop session definitions
    #[serde(default = "default_xsessions_dir")]
    pub xsessions_dir: PathBuf,

    /// System-wide default desktop (`DESKTOP=` key)
    #[serde(default = "default_system_desktop_file")]
    pub system_desktop_file: PathBuf,

    /// System-wide default locale (`LANG=` key)
    #[serde(default = "default_system_i18n_file")]
    pub system_i18n_file: PathBuf,

    /// Per-user desktop resource, relative to the home directory
    #[serde(default = "default_user_desktop_file")]
    pub user_desktop_file: PathBuf,

    /// Per-user locale resource, relative to the home directory
    #[serde(default = "default_user_i18n_file")]
    pub user_i18n_file: PathBuf,

    /// Remembers the last user for prompt pre-fill
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,

    /// Session stderr log, relative to the home directory
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            launcher: default_launcher(),
            xsessions_dir: default_xsessions_dir(),
            system_desktop_file: default_system_desktop_file(),
            system_i18n_file: default_system_i18n_file(),
            user_desktop_file: default_user_desktop_file(),
            user_i18n_file: default_user_i18n_file(),
            cache_file: default_cache_file(),
            error_log: default_error_log(),
        }
    }
}

fn default_launcher() -> PathBuf {
    PathBuf::from("/etc/X11/xinit/Xsession")
}

fn default_xsessions_dir() -> PathBuf {
    PathBuf::from("/usr/share/xsessions")
}

fn default_system_desktop_file() -> PathBuf {
    PathBuf::from("/etc/sysconfig/desktop")
}

fn default_system_i18n_file() -> PathBuf {
    PathBuf::from("/etc/sysconfig/i18n")
}

fn default_user_desktop_file() -> PathBuf {
    PathBuf::from(".config/desktop")
}

fn default_user_i18n_file() -> PathBuf {
    PathBuf::from(".config/i18n")
}

fn default_cache_file() -> PathBuf {
    PathBuf::from("/var/cache/gould/last-user")
}

fn default_error_log() -> PathBuf {
    PathBuf::from(".xsession-errors")
}

/// External system commands (`[commands]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_suspend")]
    pub suspend: String,

    #[serde(default = "default_shutdown")]
    pub shutdown: String,

    #[serde(default = "default_reboot")]
    pub reboot: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            suspend: default_suspend(),
            shutdown: default_shutdown(),
            reboot: default_reboot(),
        }
    }
}

fn default_suspend() -> String {
    "systemctl suspend".to_string()
}

fn default_shutdown() -> String {
    "/sbin/shutdown -h now".to_string()
}

fn default_reboot() -> String {
    "/sbin/reboot".to_string()
}

/// Logging configuration (`[logging]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    #[serde(default = "default_level")]
    pub level: String,

    /// Log file in addition to stderr; an empty path disables it
    #[serde(default = "default_log_file")]
    pub log_file: Option<PathBuf>,

    /// Output format ("pretty", "compact", "json")
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_file: default_log_file(),
            format: default_format(),
        }
    }
}

impl LoggingConfig {
    /// Configured log file, if file logging is enabled
    pub fn file(&self) -> Option<&Path> {
        self.log_file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("/var/log/gould.log"))
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "compact".to_string()
}

/// Built-in prompt configuration (`[prompt]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Pre-fill the user name with the last successful login
    #[serde(default = "default_true")]
    pub prefill_user: bool,

    /// Terminal the prompt reads from and draws on, e.g. `/dev/tty7`
    #[serde(default = "default_tty")]
    pub tty: PathBuf,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            prefill_user: true,
            tty: default_tty(),
        }
    }
}

fn default_tty() -> PathBuf {
    PathBuf::from(crate::prompt::tty::DEFAULT_TTY)
}

fn default_true() -> bool {
    true
}
