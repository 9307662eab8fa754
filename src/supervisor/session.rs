//! User session process setup
//!
//! Everything the child does between fork and exec runs in a `pre_exec`
//! hook and sticks to async-signal-safe system calls: buffers, paths and
//! the group list are prepared by the parent.

use nix::unistd::{Gid, Uid};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use crate::auth::UserIdentity;

use super::display::Display;
use super::error::{Result, SupervisorError};
use super::xauth::{self, Cookie};

/// PATH for sessions when none is configured
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// What to launch for an authenticated user
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Target account
    pub identity: UserIdentity,

    /// Desktop session name passed to the launcher
    pub session: Option<String>,

    /// Locale for LANG/LANGUAGE
    pub lang: Option<String>,
}

/// Static inputs shared by every session launch
#[derive(Debug, Clone)]
pub struct SessionEnvironment {
    /// Launcher script
    pub launcher: PathBuf,

    /// PATH override
    pub path: Option<String>,

    /// Session stderr log, relative to home
    pub error_log: PathBuf,
}

/// Environment handed to the session, in order
pub fn session_env(request: &SessionRequest, display: &Display, path: Option<&str>) -> Vec<(String, String)> {
    let identity = &request.identity;
    let home = identity.home.to_string_lossy().into_owned();

    let mut env = vec![
        ("HOME".to_string(), home.clone()),
        ("SHELL".to_string(), identity.shell.to_string_lossy().into_owned()),
        ("USER".to_string(), identity.name.clone()),
        ("LOGNAME".to_string(), identity.name.clone()),
        ("DISPLAY".to_string(), display.name().to_string()),
        ("XAUTHORITY".to_string(), format!("{}/.Xauthority", home)),
        ("PATH".to_string(), path.unwrap_or(DEFAULT_PATH).to_string()),
    ];

    if let Some(lang) = request.lang.as_deref().filter(|l| !l.is_empty()) {
        env.push(("LANG".to_string(), lang.to_string()));
        env.push(("LANGUAGE".to_string(), lang.chars().take(2).collect()));
    }

    env
}

fn cpath(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SupervisorError::InvalidCommand(path.display().to_string()))
}

fn supplementary_groups(identity: &UserIdentity) -> Vec<Gid> {
    let gid = Gid::from_raw(identity.gid);
    let Ok(name) = CString::new(identity.name.as_str()) else {
        return vec![gid];
    };
    match nix::unistd::getgrouplist(&name, gid) {
        Ok(groups) => groups,
        Err(e) => {
            warn!("getgrouplist({}) failed: {} - using primary group only", identity.name, e);
            vec![gid]
        }
    }
}

fn check(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Write `data` to `path` as the current (already dropped) user
///
/// # Safety
/// Only async-signal-safe calls; meant for the pre-exec window.
unsafe fn write_private_file(path: &CString, data: &[u8]) -> io::Result<()> {
    let fd = check(unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
            0o600 as libc::c_uint,
        )
    })?;
    let mut written = 0;
    while written < data.len() {
        let rest = &data[written..];
        let n = unsafe { libc::write(fd, rest.as_ptr().cast(), rest.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            unsafe { libc::close(fd) };
            return Err(err);
        }
        written += n as usize;
    }
    unsafe { libc::close(fd) };
    Ok(())
}

/// Build the session command with privilege drop and child setup
pub fn session_command(
    request: &SessionRequest,
    settings: &SessionEnvironment,
    display: &Display,
    cookie: &Cookie,
) -> Result<Command> {
    let identity = &request.identity;
    let uid = Uid::from_raw(identity.uid);
    let gid = Gid::from_raw(identity.gid);
    let groups = supplementary_groups(identity);

    let home = cpath(&identity.home)?;
    let error_log = cpath(&identity.home.join(&settings.error_log))?;
    let xauthority = cpath(&identity.home.join(".Xauthority"))?;
    let auth_records = xauth::encode_for_host(display.number(), cookie);

    let mut cmd = Command::new(&settings.launcher);
    if let Some(session) = request.session.as_deref().filter(|s| !s.is_empty()) {
        cmd.arg(session);
    }

    cmd.env_clear()
        .envs(session_env(request, display, settings.path.as_deref()))
        .stdin(Stdio::null())
        .stdout(Stdio::null());

    debug!(
        "Session command for {}: {:?} (groups: {:?})",
        identity.name, cmd, groups
    );

    // SAFETY: the hook only issues async-signal-safe syscalls on data
    // prepared above; it never allocates.
    unsafe {
        cmd.pre_exec(move || {
            // Drop privileges before anything else
            nix::unistd::setgroups(&groups)?;
            nix::unistd::setgid(gid)?;
            nix::unistd::setuid(uid)?;
            nix::unistd::setsid()?;

            // Session stderr goes to the user's own log
            let fd = libc::open(
                error_log.as_ptr(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                0o600 as libc::c_uint,
            );
            if fd >= 0 {
                libc::dup2(fd, libc::STDERR_FILENO);
                libc::close(fd);
            }

            write_private_file(&xauthority, &auth_records)?;

            check(libc::chdir(home.as_ptr()))?;
            Ok(())
        });
    }

    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(lang: Option<&str>) -> SessionRequest {
        SessionRequest {
            identity: UserIdentity {
                name: "alice".to_string(),
                uid: 1000,
                gid: 1000,
                home: PathBuf::from("/home/alice"),
                shell: PathBuf::from("/bin/zsh"),
            },
            session: Some("xfce".to_string()),
            lang: lang.map(String::from),
        }
    }

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_session_env() {
        let display = Display::parse(":0").unwrap();
        let env = session_env(&request(Some("de_DE.UTF-8")), &display, Some("/opt/bin:/usr/bin"));

        assert_eq!(lookup(&env, "HOME"), Some("/home/alice"));
        assert_eq!(lookup(&env, "SHELL"), Some("/bin/zsh"));
        assert_eq!(lookup(&env, "USER"), Some("alice"));
        assert_eq!(lookup(&env, "LOGNAME"), Some("alice"));
        assert_eq!(lookup(&env, "DISPLAY"), Some(":0"));
        assert_eq!(lookup(&env, "XAUTHORITY"), Some("/home/alice/.Xauthority"));
        assert_eq!(lookup(&env, "PATH"), Some("/opt/bin:/usr/bin"));
        assert_eq!(lookup(&env, "LANG"), Some("de_DE.UTF-8"));
        assert_eq!(lookup(&env, "LANGUAGE"), Some("de"));
    }

    #[test]
    fn test_session_env_defaults() {
        let display = Display::parse(":0").unwrap();
        let env = session_env(&request(None), &display, None);

        assert_eq!(lookup(&env, "PATH"), Some(DEFAULT_PATH));
        assert_eq!(lookup(&env, "LANG"), None);
        assert_eq!(lookup(&env, "LANGUAGE"), None);
    }

    #[test]
    fn test_session_command_arguments() {
        let display = Display::parse(":0").unwrap();
        let settings = SessionEnvironment {
            launcher: PathBuf::from("/etc/X11/xinit/Xsession"),
            path: None,
            error_log: PathBuf::from(".xsession-errors"),
        };

        let cmd = session_command(&request(None), &settings, &display, &Cookie::generate()).unwrap();
        assert_eq!(cmd.get_program(), "/etc/X11/xinit/Xsession");
        assert_eq!(cmd.get_args().collect::<Vec<_>>(), vec!["xfce"]);
    }
}
