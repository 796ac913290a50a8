use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Container, ContainerId, EngineClient, EngineError, EngineVersion};
use crate::storage::HostRecord;

#[derive(Default)]
struct MemContainer {
    container: Option<Container>,
    files: BTreeMap<String, String>,
    fail_writes: bool,
    write_delay: Option<Duration>,
}

#[derive(Default)]
struct MemHost {
    unreachable: bool,
    containers: BTreeMap<ContainerId, MemContainer>,
}

/// In-process engine. Hosts appear implicitly on first use; reachability and write
/// failures can be injected per host and per container.
#[derive(Default)]
pub struct MemoryEngine {
    hosts: RwLock<BTreeMap<String, MemHost>>,
}

impl MemoryEngine {
    pub fn new() -> Self { Self::default() }

    pub fn add_container(&self, container: Container) {
        let mut hosts = self.hosts.write();
        let host = hosts.entry(container.hostname.clone()).or_default();
        let entry = host.containers.entry(container.id.clone()).or_default();
        entry.container = Some(container);
    }

    pub fn set_unreachable(&self, hostname: &str, unreachable: bool) {
        self.hosts.write().entry(hostname.to_string()).or_default().unreachable = unreachable;
    }

    pub fn fail_writes(&self, hostname: &str, id: &ContainerId) {
        let _ = self.container_mut(hostname, id, |c| c.fail_writes = true);
    }

    pub fn delay_writes(&self, hostname: &str, id: &ContainerId, delay: Duration) {
        let _ = self.container_mut(hostname, id, |c| c.write_delay = Some(delay));
    }

    /// Content last written to `path` in the container.
    pub fn file(&self, hostname: &str, id: &ContainerId, path: &str) -> Option<String> {
        self.hosts.read().get(hostname)?.containers.get(id)?.files.get(path).cloned()
    }

    fn container_mut<T>(&self, hostname: &str, id: &ContainerId, f: impl FnOnce(&mut MemContainer) -> T) -> Option<T> {
        let mut hosts = self.hosts.write();
        let c = hosts.get_mut(hostname)?.containers.get_mut(id)?;
        Some(f(c))
    }

    fn reachable(&self, hostname: &str) -> Result<(), EngineError> {
        match self.hosts.read().get(hostname) {
            Some(h) if h.unreachable => Err(EngineError::Unreachable(format!("{} is down", hostname))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EngineClient for MemoryEngine {
    async fn version(&self, host: &HostRecord) -> Result<EngineVersion, EngineError> {
        self.reachable(&host.hostname)?;
        Ok(EngineVersion {
            version: "memory".into(),
            api_version: env!("CARGO_PKG_VERSION").into(),
            os: std::env::consts::OS.into(),
            arch: std::env::consts::ARCH.into(),
        })
    }

    async fn running_containers(&self, host: &HostRecord, owner: &str) -> Result<Vec<Container>, EngineError> {
        self.reachable(&host.hostname)?;
        let hosts = self.hosts.read();
        let Some(h) = hosts.get(&host.hostname) else { return Ok(Vec::new()); };
        Ok(h.containers
            .values()
            .filter_map(|c| c.container.as_ref())
            .filter(|c| c.running && c.owner.as_deref() == Some(owner))
            .cloned()
            .collect())
    }

    async fn inspect_container(&self, host: &HostRecord, id: &ContainerId) -> Result<Option<Container>, EngineError> {
        self.reachable(&host.hostname)?;
        let hosts = self.hosts.read();
        Ok(hosts
            .get(&host.hostname)
            .and_then(|h| h.containers.values().filter_map(|c| c.container.as_ref()).find(|c| c.id.matches(id)))
            .cloned())
    }

    async fn write_file(&self, host: &HostRecord, id: &ContainerId, path: &str, content: &str) -> Result<(), EngineError> {
        self.reachable(&host.hostname)?;
        let delay = self
            .container_mut(&host.hostname, id, |c| c.write_delay)
            .ok_or_else(|| EngineError::NoSuchContainer(id.to_string()))?;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        self.container_mut(&host.hostname, id, |c| {
            if c.fail_writes {
                return Err(EngineError::Exec(1));
            }
            c.files.insert(path.to_string(), content.to_string());
            Ok(())
        })
        .ok_or_else(|| EngineError::NoSuchContainer(id.to_string()))?
    }
}
