//! Installed X session discovery

use std::path::Path;
use tracing::debug;

/// One `*.desktop` entry under the xsessions directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopSession {
    /// File stem, passed to the session launcher
    pub id: String,
    /// Human readable `Name=`, or the id
    pub name: String,
}

/// Scan `dir` for desktop session entries, sorted by name
///
/// A missing directory yields an empty list.
pub fn scan(dir: &Path) -> Vec<DesktopSession> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot read {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut sessions: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "desktop"))
        .filter_map(|path| {
            let id = path.file_stem()?.to_string_lossy().into_owned();
            let name = std::fs::read_to_string(&path)
                .ok()
                .and_then(|content| {
                    content
                        .lines()
                        .find_map(|l| l.strip_prefix("Name="))
                        .map(|n| n.trim().to_string())
                })
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| id.clone());
            Some(DesktopSession { id, name })
        })
        .collect();

    sessions.sort_by(|a, b| a.name.cmp(&b.name));
    sessions
}
