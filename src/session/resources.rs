//! `KEY="value"` resource files
//!
//! Used for the desktop and locale preferences (system-wide and per user)
//! and the last-user cache. Writes keep every other line intact: an
//! existing `KEY=` line is replaced, otherwise the key is appended.
//!
//! Files below a user's home are handled while still running as root, so
//! their paths never follow symlinks, and only single-link regular files
//! are read or rewritten.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Component, Path, PathBuf};

/// Desktop session key
pub const DESKTOP_KEY: &str = "DESKTOP";

/// Locale key
pub const LANG_KEY: &str = "LANG";

/// Sentinel meaning "use whatever was chosen last time"
pub const PREVIOUS: &str = "previous";

/// Whether a value hands the decision to the next level down
pub fn is_deferred(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == PREVIOUS
}

fn line_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.trim_start().strip_prefix(key)?;
    let value = rest.strip_prefix('=')?.trim();
    Some(
        value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value),
    )
}

/// Value of `key` in resource text
pub fn parse_value(content: &str, key: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line_value(line, key))
        .map(str::to_string)
}

/// Value of `key` in a resource file; missing or unreadable files yield `None`
pub fn read_value(path: &Path, key: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| parse_value(&content, key))
}

/// Value of `key` in `home/relative`, without following symlinks
pub fn read_user_value(home: &Path, relative: &Path, key: &str) -> Option<String> {
    let path = user_path(home, relative, None).ok()?;
    let mut file = open_regular(&path, OpenOptions::new().read(true)).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    parse_value(&content, key)
}

/// Set `key` in resource text, replacing its line or appending one
pub fn merge_value(content: &str, key: &str, value: &str) -> String {
    let entry = format!("{}=\"{}\"", key, value);
    let mut found = false;
    let mut out = String::with_capacity(content.len() + entry.len() + 1);

    for line in content.lines() {
        if !found && line_value(line, key).is_some() {
            out.push_str(&entry);
            found = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !found {
        out.push_str(&entry);
        out.push('\n');
    }
    out
}

/// Merge `key` into the root-owned file at `path`, creating it (and its directory)
pub fn write_value(path: &Path, key: &str, value: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    merge_file(path, key, value, None)
}

/// Merge `key` into `home/relative` on behalf of a user
///
/// Missing directories below `home` are created and, like the file, handed
/// to `owner`. Symlinks, `..` and files that are not single-link regular
/// files are refused.
pub fn write_user_value(
    home: &Path,
    relative: &Path,
    key: &str,
    value: &str,
    owner: (u32, u32),
) -> io::Result<()> {
    let path = user_path(home, relative, Some(owner))?;
    merge_file(&path, key, value, Some(owner))
}

fn merge_file(path: &Path, key: &str, value: &str, owner: Option<(u32, u32)>) -> io::Result<()> {
    let mut file = open_regular(
        path,
        OpenOptions::new().read(true).write(true).create(true).mode(0o644),
    )?;

    let mut current = String::new();
    file.read_to_string(&mut current)?;
    let merged = merge_value(&current, key, value);

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(merged.as_bytes())?;

    if let Some((uid, gid)) = owner {
        std::os::unix::fs::fchown(&file, Some(uid), Some(gid))?;
    }
    Ok(())
}

/// Open without following a final symlink, and only if a plain file
fn open_regular(path: &Path, options: &mut OpenOptions) -> io::Result<File> {
    let file = options
        .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK)
        .open(path)?;
    let meta = file.metadata()?;
    if !meta.is_file() || meta.nlink() > 1 {
        return Err(refused(path));
    }
    Ok(file)
}

/// Walk `relative` below `base`, refusing symlinked directories
///
/// With `create` set, missing directories are made and chowned.
fn user_path(base: &Path, relative: &Path, create: Option<(u32, u32)>) -> io::Result<PathBuf> {
    let mut path = base.to_path_buf();
    let mut components = relative.components().peekable();

    while let Some(component) = components.next() {
        let Component::Normal(name) = component else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a plain relative path", relative.display()),
            ));
        };
        path.push(name);
        if components.peek().is_none() {
            break;
        }

        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(refused(&path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some((uid, gid)) = create else {
                    return Err(e);
                };
                std::fs::create_dir(&path)?;
                std::os::unix::fs::lchown(&path, Some(uid), Some(gid))?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(path)
}

fn refused(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("Refusing {}: not a regular file or directory", path.display()),
    )
}

/// One preference resolved through explicit → user → system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Chosen value, `None` if every level deferred
    pub value: Option<String>,
    /// The value came from the explicit parameter
    pub explicit: bool,
}

/// Resolve `key` through the fallback chain
///
/// The user level is `home/user_file`, the system level `system_file`.
pub fn resolve(
    explicit: Option<&str>,
    home: &Path,
    user_file: &Path,
    system_file: &Path,
    key: &str,
) -> Resolved {
    if let Some(value) = explicit.filter(|v| !is_deferred(v)) {
        return Resolved {
            value: Some(value.trim().to_string()),
            explicit: true,
        };
    }

    let value = read_user_value(home, user_file, key)
        .filter(|v| !is_deferred(v))
        .or_else(|| read_value(system_file, key).filter(|v| !is_deferred(v)));

    Resolved {
        value,
        explicit: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_value() {
        let content = "# comment\nDESKTOP=\"xfce\"\nLANG=de_DE.UTF-8\n";
        assert_eq!(parse_value(content, DESKTOP_KEY).as_deref(), Some("xfce"));
        assert_eq!(parse_value(content, LANG_KEY).as_deref(), Some("de_DE.UTF-8"));
        assert_eq!(parse_value(content, "LANGUAGE"), None);
        assert_eq!(parse_value("DESKTOPX=\"kde\"", DESKTOP_KEY), None);
    }

    #[test]
    fn test_merge_replaces_or_appends() {
        let content = "A=\"1\"\nDESKTOP=\"kde\"\nB=\"2\"\n";
        assert_eq!(
            merge_value(content, DESKTOP_KEY, "xfce"),
            "A=\"1\"\nDESKTOP=\"xfce\"\nB=\"2\"\n"
        );
        assert_eq!(merge_value("A=\"1\"", DESKTOP_KEY, "xfce"), "A=\"1\"\nDESKTOP=\"xfce\"\n");
        assert_eq!(merge_value("", LANG_KEY, "C"), "LANG=\"C\"\n");
    }

    #[test]
    fn test_deferred_values() {
        assert!(is_deferred(""));
        assert!(is_deferred("  "));
        assert!(is_deferred(PREVIOUS));
        assert!(!is_deferred("xfce"));
    }

    #[test]
    fn test_resolution_chain() {
        let dir = TempDir::new().unwrap();
        let home = dir.path();
        let user = Path::new("user");
        let system = home.join("system");
        std::fs::write(&system, "DESKTOP=\"gnome\"\n").unwrap();

        // Nothing explicit, nothing for the user: system wins
        let r = resolve(None, home, user, &system, DESKTOP_KEY);
        assert_eq!(r.value.as_deref(), Some("gnome"));
        assert!(!r.explicit);

        // User preference beats system
        std::fs::write(home.join(user), "DESKTOP=\"kde\"\n").unwrap();
        let r = resolve(Some(PREVIOUS), home, user, &system, DESKTOP_KEY);
        assert_eq!(r.value.as_deref(), Some("kde"));

        // Explicit beats both
        let r = resolve(Some("xfce"), home, user, &system, DESKTOP_KEY);
        assert_eq!(r.value.as_deref(), Some("xfce"));
        assert!(r.explicit);

        // Sentinel at the user level defers to system
        std::fs::write(home.join(user), "DESKTOP=\"previous\"\n").unwrap();
        let r = resolve(Some(""), home, user, &system, DESKTOP_KEY);
        assert_eq!(r.value.as_deref(), Some("gnome"));

        // Everything deferred
        std::fs::write(&system, "DESKTOP=\"\"\n").unwrap();
        assert_eq!(resolve(None, home, user, &system, DESKTOP_KEY).value, None);
    }

    #[test]
    fn test_lang_uses_same_rule() {
        let dir = TempDir::new().unwrap();
        let system = dir.path().join("sys-i18n");
        std::fs::write(&system, "LANG=\"fr_FR.UTF-8\"\n").unwrap();

        assert_eq!(
            resolve(Some("previous"), dir.path(), Path::new("i18n"), &system, LANG_KEY)
                .value
                .as_deref(),
            Some("fr_FR.UTF-8")
        );
    }

    #[test]
    fn test_write_value_creates_and_merges() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache/last");

        write_value(&path, DESKTOP_KEY, "xfce").unwrap();
        std::fs::write(&path, "OTHER=\"x\"\nDESKTOP=\"xfce\"\n").unwrap();
        write_value(&path, DESKTOP_KEY, "kde").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "OTHER=\"x\"\nDESKTOP=\"kde\"\n"
        );
    }

    fn current_owner() -> (u32, u32) {
        (
            nix::unistd::getuid().as_raw(),
            nix::unistd::getgid().as_raw(),
        )
    }

    #[test]
    fn test_write_user_value_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let home = dir.path();
        let relative = Path::new(".config/gould/desktop");

        write_user_value(home, relative, DESKTOP_KEY, "xfce", current_owner()).unwrap();
        assert_eq!(
            read_user_value(home, relative, DESKTOP_KEY).as_deref(),
            Some("xfce")
        );
    }

    #[test]
    fn test_user_symlinks_are_refused() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("home");
        std::fs::create_dir_all(home.join(".config")).unwrap();
        let victim = dir.path().join("victim");
        std::fs::write(&victim, "root:secret\n").unwrap();
        std::os::unix::fs::symlink(&victim, home.join(".config/desktop")).unwrap();

        let relative = Path::new(".config/desktop");
        let owner = current_owner();
        assert!(write_user_value(&home, relative, DESKTOP_KEY, "xfce", owner).is_err());
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "root:secret\n");

        // Symlinked directory on the way
        std::fs::write(&victim, "DESKTOP=\"kde\"\n").unwrap();
        let elsewhere = dir.path().join("elsewhere");
        std::fs::create_dir(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, home.join(".local")).unwrap();
        let through_link = Path::new(".local/desktop");
        assert!(write_user_value(&home, through_link, DESKTOP_KEY, "xfce", owner).is_err());
        assert!(!elsewhere.join("desktop").exists());

        // Reads do not follow either
        assert_eq!(read_user_value(&home, relative, DESKTOP_KEY), None);

        // Hard links and parent escapes
        std::fs::remove_file(home.join(".config/desktop")).unwrap();
        std::fs::hard_link(&victim, home.join(".config/desktop")).unwrap();
        assert!(write_user_value(&home, relative, DESKTOP_KEY, "xfce", owner).is_err());
        let escape = Path::new("../victim");
        assert!(write_user_value(&home, escape, DESKTOP_KEY, "xfce", owner).is_err());
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "DESKTOP=\"kde\"\n");
    }
}
