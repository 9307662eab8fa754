//! passwd/shadow credential store

use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::accounts::{find_passwd, find_shadow_hash, PasswdEntry};
use super::{AuthError, AuthOutcome, AuthStatus, CredentialStore, UserIdentity};

/// Credential store backed by the passwd and shadow databases
pub struct ShadowStore {
    passwd_file: PathBuf,
    shadow_file: PathBuf,
    open_for: Option<String>,
}

impl ShadowStore {
    pub fn new(passwd_file: PathBuf, shadow_file: PathBuf) -> Self {
        Self {
            passwd_file,
            shadow_file,
            open_for: None,
        }
    }

    fn stored_hash(&self, entry: &PasswdEntry) -> std::result::Result<String, AuthStatus> {
        if !entry.is_shadowed() {
            return Ok(entry.password.clone());
        }

        match find_shadow_hash(&self.shadow_file, &entry.name) {
            Ok(Some(hash)) => Ok(hash),
            Ok(None) => {
                warn!("No shadow entry for {}", entry.name);
                Err(AuthStatus::InternalError)
            }
            Err(e) => {
                warn!("Cannot read {}: {}", self.shadow_file.display(), e);
                Err(AuthStatus::InternalError)
            }
        }
    }
}

fn verify(password: &str, stored: &str) -> bool {
    if stored.is_empty() {
        return password.is_empty();
    }
    if stored.starts_with('!') || stored.starts_with('*') {
        return false;
    }
    pwhash::unix::verify(password, stored)
}

impl CredentialStore for ShadowStore {
    fn check(&self) -> Result<()> {
        for path in [&self.passwd_file, &self.shadow_file] {
            std::fs::File::open(path).map_err(|source| AuthError::Unreadable {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn authenticate(&mut self, username: &str, password: Option<String>) -> AuthOutcome {
        let entry = match find_passwd(&self.passwd_file, username) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!("Unknown user: {}", username);
                return AuthOutcome::failed(AuthStatus::BadUser);
            }
            Err(e) => {
                warn!("Cannot read {}: {}", self.passwd_file.display(), e);
                return AuthOutcome::failed(AuthStatus::InternalError);
            }
        };

        let identity = UserIdentity {
            name: entry.name.clone(),
            uid: entry.uid,
            gid: entry.gid,
            home: entry.home.clone(),
            shell: entry.shell.clone(),
        };

        let Some(password) = password else {
            return AuthOutcome::success(identity);
        };

        let stored = match self.stored_hash(&entry) {
            Ok(hash) => hash,
            Err(status) => return AuthOutcome::failed(status),
        };

        if !verify(&password, &stored) {
            warn!("Authentication failed for user: {}", username);
            return AuthOutcome::failed(AuthStatus::Failure);
        }

        if identity.has_nologin_shell() {
            warn!("User {} has a nologin shell", username);
            return AuthOutcome::failed(AuthStatus::NoPrivilege);
        }

        info!("User {} authenticated", username);
        AuthOutcome::success(identity)
    }

    fn open_session(&mut self, identity: &UserIdentity) -> Result<()> {
        if self.open_for.is_none() {
            self.open_for = Some(identity.name.clone());
        }
        Ok(())
    }

    fn close_session(&mut self) {
        if let Some(name) = self.open_for.take() {
            debug!("Closed session context for {}", name);
        }
    }

    fn has_open_session(&self) -> bool {
        self.open_for.is_some()
    }
}
