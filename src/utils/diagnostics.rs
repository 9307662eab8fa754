//! Startup diagnostics
//!
//! Logs the host facts that matter when a display fails to come up.

use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Host information for diagnostics
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// Kernel release string
    pub kernel_version: String,

    /// System hostname
    pub hostname: String,

    /// Effective user id of the daemon
    pub euid: u32,

    /// Whether the X socket directory exists yet
    pub x11_socket_dir: bool,
}

impl SystemInfo {
    /// Gather host information
    pub fn gather() -> Self {
        Self {
            kernel_version: std::fs::read_to_string("/proc/sys/kernel/osrelease")
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "Unknown".to_string()),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "Unknown".to_string()),
            euid: nix::unistd::geteuid().as_raw(),
            x11_socket_dir: Path::new("/tmp/.X11-unix").is_dir(),
        }
    }

    /// Log host information
    pub fn log(&self) {
        info!("=== System Information ===");
        info!("  Kernel: {}", self.kernel_version);
        info!("  Hostname: {}", self.hostname);
        info!("  EUID: {}", self.euid);
        info!("  /tmp/.X11-unix present: {}", self.x11_socket_dir);
    }
}

/// Log startup diagnostics
pub fn log_startup_diagnostics() {
    let info = SystemInfo::gather();
    info.log();
    if info.euid != 0 {
        tracing::warn!("Not running as root; sessions can only start for the current user");
    }
}

/// Format a run duration as `HH:MM:SS`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
