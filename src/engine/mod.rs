//! Remote container engines running on each host.
//!
//! `EngineClient` is the narrow surface the rest of the crate needs: engine version,
//! the running containers of one owner, one container's port mappings, and writing a
//! file into a container. `DockerEngine` speaks the Docker Engine HTTP API;
//! `MemoryEngine` keeps everything in process for development and tests.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::storage::HostRecord;

mod docker;
mod memory;

pub use docker::DockerEngine;
pub use memory::MemoryEngine;

/// Container label carrying the owning user.
pub const OWNER_LABEL: &str = "fleetgate.owner";

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),
    #[error("engine answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected engine response: {0}")]
    Decode(String),
    #[error("command in container exited with {0}")]
    Exec(i64),
    #[error("no such container: {0}")]
    NoSuchContainer(String),
    #[error("engine call timed out after {0} ms")]
    Timeout(u64),
    #[error("file content of {size} bytes exceeds the {limit} byte write limit")]
    TooLarge { size: usize, limit: usize },
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            EngineError::Decode(e.to_string())
        } else {
            EngineError::Unreachable(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid container id {0:?}: expected at least 16 hex characters")]
pub struct InvalidContainerId(pub String);

/// Hex container id, at least 16 characters (short or full form). Stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    pub const MIN_LEN: usize = 16;
    pub const MAX_LEN: usize = 64;

    pub fn as_str(&self) -> &str { &self.0 }

    /// Whether this id and `other` name the same container, one possibly abbreviated.
    pub fn matches(&self, other: &ContainerId) -> bool {
        self.0.starts_with(&other.0) || other.0.starts_with(&self.0)
    }
}

impl FromStr for ContainerId {
    type Err = InvalidContainerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ok = (Self::MIN_LEN..=Self::MAX_LEN).contains(&s.len())
            && s.bytes().all(|b| b.is_ascii_hexdigit());
        if ok { Ok(Self(s.to_ascii_lowercase())) } else { Err(InvalidContainerId(s.to_string())) }
    }
}

impl TryFrom<String> for ContainerId {
    type Error = InvalidContainerId;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self { id.0 }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl FromStr for Protocol {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(EngineError::Decode(format!("unknown protocol {}", other))),
        }
    }
}

/// One published port: container-internal port to host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub internal: u16,
    pub external: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: ContainerId,
    pub hostname: String,
    pub owner: Option<String>,
    pub running: bool,
    pub ports: Vec<PortMapping>,
}

impl Container {
    pub fn port(&self, internal: u16) -> Option<&PortMapping> {
        self.ports.iter().find(|p| p.internal == internal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVersion {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "ApiVersion", default)]
    pub api_version: String,
    #[serde(rename = "Os", default)]
    pub os: String,
    #[serde(rename = "Arch", default)]
    pub arch: String,
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn version(&self, host: &HostRecord) -> Result<EngineVersion, EngineError>;

    /// Running containers on `host` labelled as owned by `owner`.
    async fn running_containers(&self, host: &HostRecord, owner: &str) -> Result<Vec<Container>, EngineError>;

    /// `Ok(None)` when the engine does not know the container.
    async fn inspect_container(&self, host: &HostRecord, id: &ContainerId) -> Result<Option<Container>, EngineError>;

    /// Replace the file at absolute `path` inside the container with `content`.
    async fn write_file(&self, host: &HostRecord, id: &ContainerId, path: &str, content: &str) -> Result<(), EngineError>;
}
