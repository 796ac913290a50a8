use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operation classes a delegation token can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Everything the user could do with their own session on the bound host.
    #[serde(rename = "user")]
    User,
    /// Container port lookups only.
    #[serde(rename = "user:ports")]
    UserPorts,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::User => "user",
            Capability::UserPorts => "user:ports",
        }
    }

    /// Whether holding `self` is enough for an operation of class `required`.
    pub fn covers(&self, required: Capability) -> bool {
        match self {
            Capability::User => true,
            Capability::UserPorts => required == Capability::UserPorts,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Capability::User),
            "user:ports" => Ok(Capability::UserPorts),
            other => Err(UnknownCapability(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, cap: Capability) -> bool { self.0.insert(cap) }

    pub fn contains(&self, cap: Capability) -> bool { self.0.contains(&cap) }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ { self.0.iter().copied() }

    /// True if any member covers `required`.
    pub fn grants(&self, required: Capability) -> bool {
        self.0.iter().any(|c| c.covers(required))
    }

    /// Members that cover `required`; the capability set handed to a delegated caller
    /// once a specific operation has been authorized.
    pub fn narrowed_to(&self, required: Capability) -> CapabilitySet {
        self.0.iter().copied().filter(|c| c.covers(required)).collect()
    }

    /// Parse scope strings, rejecting unknown names rather than dropping them.
    pub fn parse<I, S>(scopes: I) -> Result<Self, UnknownCapability>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        scopes.into_iter().map(|s| s.as_ref().parse::<Capability>()).collect()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_covers_ports_but_not_the_reverse() {
        assert!(Capability::User.covers(Capability::UserPorts));
        assert!(Capability::User.covers(Capability::User));
        assert!(Capability::UserPorts.covers(Capability::UserPorts));
        assert!(!Capability::UserPorts.covers(Capability::User));
    }

    #[test]
    fn parse_rejects_near_misses() {
        let set = CapabilitySet::parse(["user:ports"]).unwrap();
        assert!(set.grants(Capability::UserPorts));
        assert!(!set.grants(Capability::User));
        assert_eq!(CapabilitySet::parse(["user:port"]), Err(UnknownCapability("user:port".into())));
        assert!(CapabilitySet::parse(["users"]).is_err());
    }

    #[test]
    fn narrowing_keeps_only_covering_members() {
        let set: CapabilitySet = [Capability::User, Capability::UserPorts].into_iter().collect();
        assert_eq!(set.narrowed_to(Capability::UserPorts), set);
        let only_user: CapabilitySet = [Capability::User].into_iter().collect();
        assert_eq!(set.narrowed_to(Capability::User), only_user);
    }

    #[test]
    fn serde_uses_scope_strings() {
        let set: CapabilitySet = [Capability::UserPorts].into_iter().collect();
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["user:ports"]"#);
        let back: CapabilitySet = serde_json::from_str(r#"["user","user:ports"]"#).unwrap();
        assert!(back.contains(Capability::User));
        assert!(back.contains(Capability::UserPorts));
    }
}
