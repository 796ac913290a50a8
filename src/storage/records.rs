use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::CapabilitySet;
use crate::security::ClientCredential;

/// A container host in the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostRecord {
    pub hostname: String,
    /// Free-form properties; `port` selects the engine port.
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub credential: ClientCredential,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every committed mutation of this record.
    #[serde(default)]
    pub version: u64,
}

impl HostRecord {
    /// Engine port from the `port` property, accepting either a number or a numeric string.
    pub fn engine_port(&self) -> Option<u16> {
        match self.properties.get("port")? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub username: String,
    /// Argon2 PHC string. Accounts without one cannot log in with a password.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub profile: Map<String, Value>,
    #[serde(default)]
    pub configurations: BTreeMap<String, String>,
    #[serde(default)]
    pub version: u64,
}

/// A host-bound grant of a subset of a user's capabilities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelegationRecord {
    pub user: String,
    pub hostname: String,
    pub scopes: CapabilitySet,
    pub issued_at: DateTime<Utc>,
}

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub hosts: BTreeMap<String, HostRecord>,
    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
    /// Delegation token -> scope.
    #[serde(default)]
    pub delegations: BTreeMap<String, DelegationRecord>,
}
