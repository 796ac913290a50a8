use super::capability::{Capability, CapabilitySet};
use super::Identity;
use crate::error::AppError;

/// Things a request can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    HostList,
    Host(&'a str),
    HostCredentials(&'a str),
    HostVersion(&'a str),
    /// Port mappings of containers on the named host.
    ContainerPorts(&'a str),
    /// Profile, configurations and delegations of the named account.
    UserData(&'a str),
    UserAccounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    Full,
    /// Delegated access narrowed to the capabilities covering this operation.
    Scoped(CapabilitySet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Answer as if the resource did not exist.
    NotFound,
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(Grant),
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool { matches!(self, Decision::Allow(_)) }

    /// Convert into the error taxonomy; `what` names the resource in messages.
    pub fn into_result(self, what: &str) -> Result<Grant, AppError> {
        match self {
            Decision::Allow(g) => Ok(g),
            Decision::Deny(DenyReason::NotFound) => Err(AppError::not_found("not_found".to_string(), format!("{} not found", what))),
            Decision::Deny(DenyReason::Unauthorized) => Err(AppError::unauthorized("unauthorized".to_string(), format!("not authorized for {}", what))),
        }
    }
}

const ALLOW: Decision = Decision::Allow(Grant::Full);
const NOT_FOUND: Decision = Decision::Deny(DenyReason::NotFound);
const UNAUTHORIZED: Decision = Decision::Deny(DenyReason::Unauthorized);

/// Decide whether `identity` may perform `action` on `resource`.
///
/// Resources whose mere existence is sensitive (host records, credentials, engine
/// versions) deny with `NotFound` so hostnames cannot be enumerated. Container and
/// user resources deny with `Unauthorized`: the caller already named them.
pub fn authorize(identity: &Identity, resource: Resource<'_>, action: Action) -> Decision {
    match resource {
        Resource::HostList => {
            if identity.is_admin() { ALLOW } else { UNAUTHORIZED }
        }
        Resource::Host(hostname) => match (identity, action) {
            (Identity::AdminUser(_), _) => ALLOW,
            (Identity::Host(h), Action::Read | Action::Update) if h == hostname => ALLOW,
            (_, Action::Read | Action::Delete) => NOT_FOUND,
            (_, Action::Create | Action::Update) => UNAUTHORIZED,
        },
        Resource::HostCredentials(_) | Resource::HostVersion(_) => {
            if identity.is_admin() { ALLOW } else { NOT_FOUND }
        }
        Resource::ContainerPorts(hostname) => match identity {
            Identity::AdminUser(_) => ALLOW,
            Identity::Delegated { hostname: bound, scopes, .. }
                if bound == hostname && scopes.grants(Capability::UserPorts) =>
            {
                Decision::Allow(Grant::Scoped(scopes.narrowed_to(Capability::UserPorts)))
            }
            _ => UNAUTHORIZED,
        },
        Resource::UserData(owner) => match identity.session_user() {
            Some(user) if user == owner => ALLOW,
            _ => UNAUTHORIZED,
        },
        Resource::UserAccounts => {
            if identity.is_admin() { ALLOW } else { UNAUTHORIZED }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Identity { Identity::AdminUser("root@example.com".into()) }
    fn host(h: &str) -> Identity { Identity::Host(h.into()) }
    fn user() -> Identity { Identity::User("ada@example.com".into()) }
    fn delegated(h: &str, scopes: &[&str]) -> Identity {
        Identity::Delegated {
            user: "ada@example.com".into(),
            hostname: h.into(),
            scopes: CapabilitySet::parse(scopes).unwrap(),
        }
    }

    #[test]
    fn host_list_is_admin_only() {
        assert_eq!(authorize(&admin(), Resource::HostList, Action::Read), ALLOW);
        for id in [Identity::None, user(), host("a"), delegated("a", &["user"])] {
            assert_eq!(authorize(&id, Resource::HostList, Action::Read), UNAUTHORIZED);
        }
    }

    #[test]
    fn host_record_read_hides_existence() {
        let r = Resource::Host("a");
        assert_eq!(authorize(&admin(), r, Action::Read), ALLOW);
        assert_eq!(authorize(&host("a"), r, Action::Read), ALLOW);
        assert_eq!(authorize(&host("b"), r, Action::Read), NOT_FOUND);
        assert_eq!(authorize(&user(), r, Action::Read), NOT_FOUND);
        assert_eq!(authorize(&Identity::None, r, Action::Read), NOT_FOUND);
    }

    #[test]
    fn host_record_writes() {
        let r = Resource::Host("a");
        assert_eq!(authorize(&admin(), r, Action::Create), ALLOW);
        assert_eq!(authorize(&admin(), r, Action::Update), ALLOW);
        assert_eq!(authorize(&host("a"), r, Action::Update), ALLOW);
        assert_eq!(authorize(&host("a"), r, Action::Create), UNAUTHORIZED);
        assert_eq!(authorize(&host("b"), r, Action::Update), UNAUTHORIZED);
        assert_eq!(authorize(&user(), r, Action::Create), UNAUTHORIZED);
        assert_eq!(authorize(&admin(), r, Action::Delete), ALLOW);
        assert_eq!(authorize(&host("a"), r, Action::Delete), NOT_FOUND);
    }

    #[test]
    fn credentials_and_version_are_admin_only_and_hidden() {
        for r in [Resource::HostCredentials("a"), Resource::HostVersion("a")] {
            assert_eq!(authorize(&admin(), r, Action::Read), ALLOW);
            assert_eq!(authorize(&host("a"), r, Action::Read), NOT_FOUND);
            assert_eq!(authorize(&user(), r, Action::Update), NOT_FOUND);
            assert_eq!(authorize(&delegated("a", &["user"]), r, Action::Read), NOT_FOUND);
        }
    }

    #[test]
    fn container_ports_admin_or_scoped_delegate() {
        let r = Resource::ContainerPorts("a");
        assert_eq!(authorize(&admin(), r, Action::Read), ALLOW);
        let decision = authorize(&delegated("a", &["user:ports"]), r, Action::Read);
        assert_eq!(decision, Decision::Allow(Grant::Scoped(CapabilitySet::parse(["user:ports"]).unwrap())));
        assert!(authorize(&delegated("a", &["user"]), r, Action::Read).is_allowed());
        assert_eq!(authorize(&delegated("b", &["user:ports"]), r, Action::Read), UNAUTHORIZED);
        assert_eq!(authorize(&delegated("a", &[]), r, Action::Read), UNAUTHORIZED);
        assert_eq!(authorize(&host("a"), r, Action::Read), UNAUTHORIZED);
        assert_eq!(authorize(&user(), r, Action::Read), UNAUTHORIZED);
    }

    #[test]
    fn user_data_is_self_only() {
        let r = Resource::UserData("ada@example.com");
        assert_eq!(authorize(&user(), r, Action::Update), ALLOW);
        assert_eq!(authorize(&admin(), r, Action::Read), UNAUTHORIZED);
        assert_eq!(authorize(&delegated("a", &["user"]), r, Action::Read), UNAUTHORIZED);
        assert_eq!(authorize(&Identity::None, r, Action::Read), UNAUTHORIZED);
    }

    #[test]
    fn deny_reasons_map_to_error_taxonomy() {
        let nf = NOT_FOUND.into_result("host").unwrap_err();
        assert_eq!(nf.http_status(), 404);
        let ua = UNAUTHORIZED.into_result("host list").unwrap_err();
        assert_eq!(ua.http_status(), 403);
    }
}
