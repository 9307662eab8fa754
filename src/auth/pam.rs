//! PAM credential store
//!
//! The authenticator created for a successful check is kept until the
//! session starts, so `open_session` runs on the same PAM handle that
//! authenticated the user. Dropping it closes the session and ends the
//! transaction.
//!
//! A login that never ran the PAM conversation (account lookup without a
//! password) has no handle to open a session on, so it starts without a
//! PAM session. Autologin passes the configured password and is unaffected.

use anyhow::Result;
use pam::{Authenticator, PasswordConv};
use tracing::{debug, info, warn};

use super::{AuthOutcome, AuthStatus, CredentialStore, UserIdentity};

/// Credential store backed by a PAM service
pub struct PamStore {
    service: String,
    authenticated: Option<Authenticator<'static, PasswordConv>>,
    session_open: bool,
}

impl PamStore {
    pub fn new(service: String) -> Self {
        Self {
            service,
            authenticated: None,
            session_open: false,
        }
    }

    fn lookup(username: &str) -> std::result::Result<UserIdentity, AuthStatus> {
        match nix::unistd::User::from_name(username) {
            Ok(Some(user)) => Ok(UserIdentity {
                name: user.name,
                uid: user.uid.as_raw(),
                gid: user.gid.as_raw(),
                home: user.dir,
                shell: user.shell,
            }),
            Ok(None) => Err(AuthStatus::BadUser),
            Err(e) => {
                warn!("User lookup failed for {}: {}", username, e);
                Err(AuthStatus::InternalError)
            }
        }
    }
}

impl CredentialStore for PamStore {
    fn authenticate(&mut self, username: &str, password: Option<String>) -> AuthOutcome {
        let identity = match Self::lookup(username) {
            Ok(identity) => identity,
            Err(status) => return AuthOutcome::failed(status),
        };

        let Some(password) = password else {
            return AuthOutcome::success(identity);
        };

        let mut authenticator = match Authenticator::with_password(&self.service) {
            Ok(a) => a,
            Err(e) => {
                warn!("Failed to create PAM authenticator: {}", e);
                return AuthOutcome::failed(AuthStatus::InternalError);
            }
        };

        authenticator
            .get_handler()
            .set_credentials(username, password.as_str());

        if let Err(e) = authenticator.authenticate() {
            warn!("PAM authentication failed for user '{}': {}", username, e);
            return AuthOutcome::failed(AuthStatus::Failure);
        }

        if identity.has_nologin_shell() {
            warn!("User {} has a nologin shell", username);
            return AuthOutcome::failed(AuthStatus::NoPrivilege);
        }

        info!("User '{}' authenticated via PAM", username);

        if !self.session_open {
            self.authenticated = Some(authenticator);
        }
        AuthOutcome::success(identity)
    }

    fn open_session(&mut self, identity: &UserIdentity) -> Result<()> {
        if self.session_open {
            debug!("PAM session already open");
            return Ok(());
        }

        let Some(authenticator) = self.authenticated.as_mut() else {
            info!("{} was not authenticated through PAM, no PAM session", identity.name);
            return Ok(());
        };

        match authenticator.open_session() {
            Ok(()) => {
                info!("Opened PAM session for {}", identity.name);
                self.session_open = true;
            }
            Err(e) => {
                // Authentication succeeded; the session runs without PAM
                warn!("Failed to open PAM session for {}: {}", identity.name, e);
            }
        }
        Ok(())
    }

    fn close_session(&mut self) {
        if self.authenticated.take().is_some() {
            debug!("Closed PAM transaction");
        }
        self.session_open = false;
    }

    fn has_open_session(&self) -> bool {
        self.session_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_is_bad_user() {
        let mut store = PamStore::new("gould".to_string());
        let outcome = store.authenticate("no-such-user-gould-test", Some("x".into()));
        assert_eq!(outcome.status, AuthStatus::BadUser);
        assert!(!store.has_open_session());
    }

    #[test]
    fn test_lookup_mode_root() {
        let mut store = PamStore::new("gould".to_string());
        let outcome = store.authenticate("root", None);
        assert!(outcome.is_success());
        assert_eq!(outcome.identity.unwrap().uid, 0);
    }

    #[test]
    fn test_session_without_conversation() {
        let mut store = PamStore::new("gould".to_string());
        let identity = store.authenticate("root", None).identity.unwrap();

        assert!(store.open_session(&identity).is_ok());
        assert!(!store.has_open_session());
        store.close_session();
    }
}
