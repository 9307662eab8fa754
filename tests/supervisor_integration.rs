//! Supervisor Integration Tests
//!
//! Lock file ownership against real processes and process-group teardown.

use std::os::unix::process::CommandExt;
use std::process::Command;
use tempfile::TempDir;

use gould::config::Config;
use gould::supervisor::{ChildStatus, LockFile, LockStatus, ProcessSupervisor};

#[test]
fn test_lock_held_by_live_instance() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gould.pid");

    let mut holder = Command::new("sleep").arg("30").spawn().unwrap();
    let holder_pid = holder.id() as i32;
    let program = std::fs::read_link(format!("/proc/{}/exe", holder_pid))
        .unwrap()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    std::fs::write(&path, format!("{}\n", holder_pid)).unwrap();

    let lock = LockFile::new(&path, program);
    assert_eq!(lock.acquire().unwrap(), LockStatus::AlreadyRunning(holder_pid));

    // Release leaves a foreign lock alone
    lock.release();
    assert_eq!(lock.recorded_pid(), Some(holder_pid));

    // A live process of another program does not block
    let other = LockFile::new(&path, "gould-does-not-match");
    assert_eq!(other.acquire().unwrap(), LockStatus::Acquired);
    other.release();
    assert!(!path.exists());

    let _ = holder.kill();
    let _ = holder.wait();
}

#[test]
fn test_stop_process_group() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.core.authfile = dir.path().join("auth");
    let mut supervisor = ProcessSupervisor::new(&config).unwrap();

    let child = Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap();
    let pid = child.id() as i32;

    let status = supervisor.stop(pid).unwrap();
    assert_eq!(status, Some(ChildStatus::Signaled(nix::sys::signal::Signal::SIGTERM)));

    // Second stop and bogus pids are no-ops
    assert_eq!(supervisor.stop(pid).unwrap(), None);
    assert_eq!(supervisor.stop(0).unwrap(), None);
    assert_eq!(supervisor.stop(-1).unwrap(), None);
}
