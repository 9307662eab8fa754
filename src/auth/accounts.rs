//! passwd(5) and shadow(5) database parsing

use std::path::{Path, PathBuf};

/// One line of the account database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: PathBuf,
    pub shell: PathBuf,
}

impl PasswdEntry {
    /// Parse a `name:passwd:uid:gid:gecos:home:shell` line
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(7, ':');
        let name = fields.next()?;
        let password = fields.next()?;
        let uid = fields.next()?.parse().ok()?;
        let gid = fields.next()?.parse().ok()?;
        let gecos = fields.next()?;
        let home = fields.next()?;
        let shell = fields.next()?;

        if name.is_empty() || name.starts_with('#') {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            password: password.to_string(),
            uid,
            gid,
            gecos: gecos.to_string(),
            home: PathBuf::from(home),
            shell: PathBuf::from(shell),
        })
    }

    /// Whether the password hash lives in the shadow database
    pub fn is_shadowed(&self) -> bool {
        self.password == "x"
    }
}

/// Find `name` in a passwd-formatted file
pub fn find_passwd(path: &Path, name: &str) -> std::io::Result<Option<PasswdEntry>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(PasswdEntry::parse)
        .find(|entry| entry.name == name))
}

/// Find the hash field for `name` in a shadow-formatted file
pub fn find_shadow_hash(path: &Path, name: &str) -> std::io::Result<Option<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().find_map(|line| {
        let mut fields = line.splitn(3, ':');
        match (fields.next(), fields.next()) {
            (Some(n), Some(hash)) if n == name => Some(hash.to_string()),
            _ => None,
        }
    }))
}
