//! Single-instance lock file
//!
//! The file holds the decimal PID of the running daemon. A recorded PID
//! only blocks startup if that process is alive and its executable image
//! still carries our program name; anything else is a stale record.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::error::Result;

/// Result of a lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// We now hold the lock
    Acquired,
    /// A live instance with the given PID holds it
    AlreadyRunning(i32),
}

/// PID file guarding one display
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    program: String,
    pid: i32,
}

impl LockFile {
    /// Lock at `path` for a daemon whose executable name is `program`
    pub fn new(path: impl Into<PathBuf>, program: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            program: program.into(),
            pid: std::process::id() as i32,
        }
    }

    /// Lock for the currently running executable
    pub fn for_current_exe(path: impl Into<PathBuf>) -> Self {
        let program = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "gould".to_string());
        Self::new(path, program)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the lock file, if any
    pub fn recorded_pid(&self) -> Option<i32> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Try to become the lock holder
    pub fn acquire(&self) -> Result<LockStatus> {
        if let Some(pid) = self.recorded_pid() {
            if pid != self.pid && self.is_live_instance(pid) {
                warn!("Lock {} held by running pid {}", self.path.display(), pid);
                return Ok(LockStatus::AlreadyRunning(pid));
            }
            debug!("Reclaiming stale lock (pid {})", pid);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{}\n", self.pid))?;

        info!("Acquired lock {} (pid {})", self.path.display(), self.pid);
        Ok(LockStatus::Acquired)
    }

    /// Remove the lock file if we still hold it
    pub fn release(&self) {
        if self.recorded_pid() == Some(self.pid) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove lock {}: {}", self.path.display(), e);
            }
        }
    }

    fn is_live_instance(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        match std::fs::read_link(format!("/proc/{}/exe", pid)) {
            Ok(exe) => exe.to_string_lossy().contains(&self.program),
            Err(_) => false,
        }
    }
}
