//! Who is calling, and what they may do.
//! Credentials are parsed once per request, resolved once into an `Identity`, and the
//! identity is then passed explicitly to the authorization policy.

mod authorizer;
mod capability;
mod credentials;
mod resolver;
mod session;

pub use authorizer::{authorize, Action, Decision, DenyReason, Grant, Resource};
pub use capability::{Capability, CapabilitySet, UnknownCapability};
pub use credentials::{ClientSecretPair, RequestCredentials, SESSION_COOKIE};
pub use resolver::{IdentityResolver, Target};
pub use session::{Session, SessionManager, SessionToken};

/// The caller of one request. Computed by `IdentityResolver` and never re-derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    None,
    /// A host authenticated with its own client credential.
    Host(String),
    /// A logged-in administrator.
    AdminUser(String),
    /// A logged-in regular user.
    User(String),
    /// A host acting for a user through a host-bound delegation token.
    Delegated {
        user: String,
        hostname: String,
        scopes: CapabilitySet,
    },
}

impl Identity {
    /// The account behind a direct user session.
    pub fn session_user(&self) -> Option<&str> {
        match self {
            Identity::AdminUser(u) | Identity::User(u) => Some(u.as_str()),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Identity::AdminUser(_))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Identity::None => "none",
            Identity::Host(_) => "host",
            Identity::AdminUser(_) => "admin",
            Identity::User(_) => "user",
            Identity::Delegated { .. } => "delegated",
        }
    }
}
