//! SIGSEGV crash hook
//!
//! The work is split in two. In signal context the handler only records
//! the signal, sends TERM to the child groups, unlinks the lock file and
//! re-executes, all through raw async-signal-safe syscalls on data built
//! by [`install`]. The fresh image then reports the crash from normal
//! context through [`previous_crash`].

use anyhow::{Context, Result};
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::OnceLock;
use tracing::debug;

use crate::supervisor::ChildRole;

use super::{MIN_STABLE_UPTIME, RESPAWN_ENV};

/// Set in the re-executed image to the signal that crashed its predecessor
pub const CRASH_ENV: &str = "GOULD_CRASHED";

static SERVER_PID: AtomicI32 = AtomicI32::new(0);
static SESSION_PID: AtomicI32 = AtomicI32::new(0);
static GREETER_PID: AtomicI32 = AtomicI32::new(0);

/// Signal number that triggered the hook, 0 if none; guards re-entry
static CRASH_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Monotonic start time in seconds
static STARTED_AT: AtomicI64 = AtomicI64::new(0);

static STATE: OnceLock<CrashState> = OnceLock::new();

struct ExecVector {
    _storage: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
}

impl ExecVector {
    fn new(storage: Vec<CString>) -> Self {
        let mut ptrs: Vec<_> = storage.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        Self {
            _storage: storage,
            ptrs,
        }
    }
}

struct CrashState {
    lock_path: CString,
    exe: CString,
    argv: ExecVector,
    /// Environment when the run counts towards the respawn limit
    env_short: Option<ExecVector>,
    /// Environment after a stable run
    env_reset: ExecVector,
}

// SAFETY: the pointers reference heap buffers owned by the same value and
// never mutated after construction.
unsafe impl Send for CrashState {}
unsafe impl Sync for CrashState {}

/// Record a child PID for teardown on crash; 0 clears the slot
pub fn register_child(role: ChildRole, pid: i32) {
    let slot = match role {
        ChildRole::DisplayServer => &SERVER_PID,
        ChildRole::Session => &SESSION_PID,
        ChildRole::Greeter => &GREETER_PID,
    };
    slot.store(pid, Ordering::SeqCst);
}

fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).context("Interior NUL byte in crash hook argument")
}

fn environment(respawns: u32) -> Result<ExecVector> {
    let mut entries = Vec::new();
    for (key, value) in std::env::vars_os() {
        if key == OsStr::new(RESPAWN_ENV) || key == OsStr::new(CRASH_ENV) {
            continue;
        }
        let mut entry = key.as_bytes().to_vec();
        entry.push(b'=');
        entry.extend_from_slice(value.as_bytes());
        entries.push(cstring(&entry)?);
    }
    entries.push(cstring(format!("{}={}", RESPAWN_ENV, respawns).as_bytes())?);
    entries.push(cstring(format!("{}={}", CRASH_ENV, libc::SIGSEGV).as_bytes())?);
    Ok(ExecVector::new(entries))
}

fn monotonic_secs() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out pointer
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as i64
}

/// Install the SIGSEGV hook
///
/// `respawns` is this image's consecutive respawn count; a crash beyond
/// `max_respawns` quick restarts exits with 255 instead of re-executing.
pub fn install(lock_path: &Path, respawns: u32, max_respawns: u32) -> Result<()> {
    let argv = std::env::args_os()
        .map(|a| cstring(a.as_bytes()))
        .collect::<Result<Vec<_>>>()?;

    let state = CrashState {
        lock_path: cstring(lock_path.as_os_str().as_bytes())?,
        exe: cstring(b"/proc/self/exe")?,
        argv: ExecVector::new(argv),
        env_short: if respawns < max_respawns {
            Some(environment(respawns + 1)?)
        } else {
            None
        },
        env_reset: environment(1)?,
    };

    if STATE.set(state).is_err() {
        debug!("Crash hook already installed");
        return Ok(());
    }
    STARTED_AT.store(monotonic_secs(), Ordering::SeqCst);

    // SAFETY: zeroed sigaction is a valid starting point; the handler is
    // an extern "C" fn with the expected signature.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_crash as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // A fault inside the handler takes the default action
        action.sa_flags = libc::SA_RESETHAND;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut()) != 0 {
            return Err(std::io::Error::last_os_error()).context("Failed to install SIGSEGV hook");
        }
    }

    debug!("Crash hook installed (respawns so far: {})", respawns);
    Ok(())
}

fn write_stderr(msg: &[u8]) {
    // SAFETY: write(2) is async-signal-safe
    unsafe { libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len()) };
}

/// Signal that crashed the previous image, if this one is its replacement
pub fn previous_crash() -> Option<i32> {
    std::env::var(CRASH_ENV).ok()?.parse().ok()
}

extern "C" fn on_crash(sig: libc::c_int) {
    if CRASH_SIGNAL.swap(sig, Ordering::SeqCst) != 0 {
        // Another thread is already handling a crash
        // SAFETY: _exit(2) is async-signal-safe
        unsafe { libc::_exit(255) };
    }
    write_stderr(b"gould: caught SIGSEGV, restarting\n");

    for slot in [&SESSION_PID, &GREETER_PID, &SERVER_PID] {
        let pid = slot.load(Ordering::SeqCst);
        if pid > 0 {
            // SAFETY: kill(2) is async-signal-safe
            unsafe { libc::kill(-pid, libc::SIGTERM) };
        }
    }

    let Some(state) = STATE.get() else {
        // SAFETY: _exit(2) is async-signal-safe
        unsafe { libc::_exit(255) };
    };

    // SAFETY: unlink(2) on a prebuilt path
    unsafe { libc::unlink(state.lock_path.as_ptr()) };

    let uptime = monotonic_secs() - STARTED_AT.load(Ordering::SeqCst);
    let env = if uptime < MIN_STABLE_UPTIME.as_secs() as i64 {
        state.env_short.as_ref()
    } else {
        Some(&state.env_reset)
    };

    match env {
        Some(env) => {
            // SAFETY: NULL-terminated vectors built in `install`
            unsafe { libc::execve(state.exe.as_ptr(), state.argv.ptrs.as_ptr(), env.ptrs.as_ptr()) };
            write_stderr(b"gould: re-exec failed\n");
        }
        None => write_stderr(b"gould: too many respawns\n"),
    }

    // SAFETY: _exit(2) is async-signal-safe
    unsafe { libc::_exit(255) };
}
