use std::sync::Arc;

use tracing::debug;

use super::capability::Capability;
use super::credentials::RequestCredentials;
use super::session::SessionManager;
use super::Identity;
use crate::storage::SharedStore;

/// What a request is aimed at, as far as identity resolution cares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Target<'a> {
    /// Host named in the request path, if any.
    pub hostname: Option<&'a str>,
    /// Operation class a delegation token must grant to be accepted.
    pub capability: Option<Capability>,
}

impl<'a> Target<'a> {
    pub fn none() -> Self { Self::default() }

    pub fn host(hostname: &'a str) -> Self {
        Self { hostname: Some(hostname), capability: None }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }
}

/// Turns raw credentials into exactly one `Identity`.
///
/// Precedence, first match wins:
/// 1. host client credential valid for the target hostname,
/// 2. live user session,
/// 3. delegation token bound to the target hostname and granting the requested class,
/// 4. nothing.
///
/// Read-only over the store and the session table; never fails.
#[derive(Clone)]
pub struct IdentityResolver {
    store: SharedStore,
    sessions: Arc<SessionManager>,
}

impl IdentityResolver {
    pub fn new(store: SharedStore, sessions: Arc<SessionManager>) -> Self {
        Self { store, sessions }
    }

    pub fn resolve(&self, creds: &RequestCredentials, target: &Target<'_>) -> Identity {
        if let Some(id) = self.resolve_host(creds, target) {
            return id;
        }
        if let Some(id) = self.resolve_session(creds) {
            return id;
        }
        if let Some(id) = self.resolve_delegation(creds, target) {
            return id;
        }
        Identity::None
    }

    fn resolve_host(&self, creds: &RequestCredentials, target: &Target<'_>) -> Option<Identity> {
        let client = creds.client.as_ref()?;
        // Only the credential of the host named in this request is consulted, so a
        // credential for host A can never authenticate a request about host B.
        let hostname = target.hostname?;
        let host = self.store.host(hostname)?;
        if host.credential.matches(&client.id, &client.secret) {
            Some(Identity::Host(host.hostname))
        } else {
            debug!(target: "auth", hostname, "client credential rejected");
            None
        }
    }

    fn resolve_session(&self, creds: &RequestCredentials) -> Option<Identity> {
        let token = creds.session.as_deref()?;
        let username = self.sessions.validate(token)?;
        // Re-read the account so admin changes and removals apply immediately.
        let user = self.store.user(&username)?;
        if user.admin {
            Some(Identity::AdminUser(user.username))
        } else {
            Some(Identity::User(user.username))
        }
    }

    fn resolve_delegation(&self, creds: &RequestCredentials, target: &Target<'_>) -> Option<Identity> {
        let token = creds.bearer.as_deref()?;
        let hostname = target.hostname?;
        let required = target.capability?;
        let grant = self.store.delegation(token)?;
        if grant.hostname != hostname {
            debug!(target: "auth", bound = %grant.hostname, requested = hostname, "delegation token used against another host");
            return None;
        }
        if !grant.scopes.grants(required) {
            debug!(target: "auth", hostname, required = %required, "delegation token lacks capability");
            return None;
        }
        self.store.user(&grant.user)?;
        Some(Identity::Delegated { user: grant.user, hostname: grant.hostname, scopes: grant.scopes })
    }
}
