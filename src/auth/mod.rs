//! Credential verification
//!
//! Looks up accounts, verifies passwords and manages the privilege context
//! (PAM session or equivalent) of the user being logged in.
//!
//! Two backends implement [`CredentialStore`]:
//!
//! - [`ShadowStore`] - passwd/shadow lookup with crypt(3) hash verification
//! - [`PamStore`] - PAM conversation and session (requires the `pam-auth` feature)
//!
//! All failure statuses are reported to front-ends identically; only the log
//! tells them apart.

use anyhow::Result;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AuthConfig;

pub mod accounts;
#[cfg(feature = "pam-auth")]
pub mod pam;
pub mod shadow;

#[cfg(feature = "pam-auth")]
pub use self::pam::PamStore;
pub use shadow::ShadowStore;

/// Authenticated (or looked-up) system account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Login name
    pub name: String,

    /// User ID
    pub uid: u32,

    /// Primary group ID
    pub gid: u32,

    /// Home directory
    pub home: PathBuf,

    /// Login shell
    pub shell: PathBuf,
}

impl UserIdentity {
    /// Whether the login shell denies interactive logins
    pub fn has_nologin_shell(&self) -> bool {
        self.shell.to_string_lossy().contains("nologin")
    }
}

/// Outcome class of an authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Credentials accepted (or account found in lookup mode)
    Success,
    /// No such account
    BadUser,
    /// Wrong password
    Failure,
    /// Password matched but the account may not log in
    NoPrivilege,
    /// Backend error
    InternalError,
}

/// Authentication result
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    /// Outcome class
    pub status: AuthStatus,

    /// Account record, present on success
    pub identity: Option<UserIdentity>,
}

impl AuthOutcome {
    pub fn success(identity: UserIdentity) -> Self {
        Self {
            status: AuthStatus::Success,
            identity: Some(identity),
        }
    }

    pub fn failed(status: AuthStatus) -> Self {
        Self {
            status,
            identity: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AuthStatus::Success
    }
}

/// Backend failure that rules out every login
#[derive(Debug, Error)]
pub enum AuthError {
    /// Account database cannot be opened
    #[error("Cannot read {}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Credential backend
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore {
    /// Verify the backend can be consulted at all
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Verify `password` for `username`; `None` only looks the account up
    fn authenticate(&mut self, username: &str, password: Option<String>) -> AuthOutcome;

    /// Open the privilege context for a verified identity
    fn open_session(&mut self, identity: &UserIdentity) -> Result<()>;

    /// Close the privilege context if one is open
    fn close_session(&mut self);

    /// Whether a privilege context is currently open
    fn has_open_session(&self) -> bool;
}

/// Credential backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBackend {
    /// passwd/shadow files
    Shadow,
    /// Pluggable Authentication Modules
    Pam,
}

impl AuthBackend {
    /// Parse backend name
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pam" => Self::Pam,
            "shadow" => Self::Shadow,
            _ => {
                warn!("Unknown auth backend '{}', defaulting to shadow", s);
                Self::Shadow
            }
        }
    }
}

/// Create the credential store selected by configuration
pub fn create_credential_store(config: &AuthConfig) -> Box<dyn CredentialStore> {
    match AuthBackend::from_str(&config.backend) {
        AuthBackend::Shadow => {
            info!("Using shadow credential store");
            Box::new(ShadowStore::new(
                config.passwd_file.clone(),
                config.shadow_file.clone(),
            ))
        }
        #[cfg(feature = "pam-auth")]
        AuthBackend::Pam => {
            info!("Using PAM credential store (service: {})", config.pam_service);
            Box::new(PamStore::new(config.pam_service.clone()))
        }
        #[cfg(not(feature = "pam-auth"))]
        AuthBackend::Pam => {
            warn!("PAM backend requested but feature not enabled - using shadow");
            Box::new(ShadowStore::new(
                config.passwd_file.clone(),
                config.shadow_file.clone(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!(AuthBackend::from_str("pam"), AuthBackend::Pam);
        assert_eq!(AuthBackend::from_str("SHADOW"), AuthBackend::Shadow);
        assert_eq!(AuthBackend::from_str("ldap"), AuthBackend::Shadow);
    }

    #[test]
    fn test_nologin_shell() {
        let mut identity = UserIdentity {
            name: "daemon".to_string(),
            uid: 2,
            gid: 2,
            home: PathBuf::from("/"),
            shell: PathBuf::from("/usr/sbin/nologin"),
        };
        assert!(identity.has_nologin_shell());

        identity.shell = PathBuf::from("/bin/sh");
        assert!(!identity.has_nologin_shell());
    }
}
