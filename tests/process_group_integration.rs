//! Process Group Teardown Tests
//!
//! Kept in their own binary: reaping collects any child of the test
//! process, which would race with tests that wait on their own children.

use nix::sys::signal::killpg;
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use gould::config::Config;
use gould::supervisor::{ChildExit, ProcessSupervisor};

/// Process state letter from /proc, `None` once the pid is gone
fn proc_state(pid: i32) -> Option<char> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    stat.rsplit_once(')')?.1.trim_start().chars().next()
}

#[test]
fn test_stop_group_after_leader_exit() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.core.authfile = dir.path().join("auth");
    let mut supervisor = ProcessSupervisor::new(&config).unwrap();

    // Leader backgrounds a client and exits straight away
    let mut leader = Command::new("sh")
        .args(["-c", "sleep 30 & echo $!; exit 0"])
        .stdout(Stdio::piped())
        .process_group(0)
        .spawn()
        .unwrap();
    let leader_pid = leader.id() as i32;
    let mut line = String::new();
    BufReader::new(leader.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    let orphan: i32 = line.trim().parse().unwrap();

    // The event loop reaps the leader before teardown runs
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut exits = Vec::new();
    while !exits.iter().any(|e: &ChildExit| e.pid == leader_pid) {
        assert!(Instant::now() < deadline, "leader did not exit");
        std::thread::sleep(Duration::from_millis(20));
        exits.extend(supervisor.reap());
    }
    assert!(matches!(proc_state(orphan), Some(s) if s != 'Z'));

    assert_eq!(supervisor.stop(leader_pid).unwrap(), None);

    // Gone, or a zombie waiting on a parent that is not us
    assert!(matches!(proc_state(orphan), None | Some('Z')));
    if proc_state(orphan).is_none() {
        assert!(killpg(Pid::from_raw(leader_pid), None).is_err());
    }
}
