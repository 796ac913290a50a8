//! Fan-out of one configuration file into every running container a user owns.
//!
//! Deployment runs in two phases. Enumeration lists the user's running containers on
//! every registered host concurrently; a host that cannot be listed is logged and
//! skipped. Writing then pushes the file into each container with a per-container
//! timeout and an optional cap on parallel writes. Failed writes are recorded in the
//! report and never retried.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::configurations;
use crate::engine::{Container, EngineClient, EngineError};
use crate::storage::{HostRecord, SharedStore};

#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Directory inside the container the file is written to.
    pub container_home: String,
    /// Bound on each engine call (listing one host, writing one container).
    pub timeout: Duration,
    /// Maximum writes in flight; `None` writes to all targets at once.
    pub concurrency: Option<usize>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self { container_home: "/home/user".to_string(), timeout: Duration::from_secs(10), concurrency: None }
    }
}

impl From<&Config> for DeployOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            container_home: cfg.container_home.clone(),
            timeout: cfg.deploy_timeout(),
            concurrency: cfg.deploy_concurrency,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("configuration file not allowed: {0}")]
    UnknownFile(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("no host could be queried for containers ({hosts} tried, last error: {last})")]
    Enumeration { hosts: usize, last: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWrite {
    pub hostname: String,
    pub container: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentReport {
    pub deployed: usize,
    pub failed: Vec<FailedWrite>,
}

impl DeploymentReport {
    pub fn count(&self) -> usize { self.deployed }

    pub fn message(&self) -> String { deployment_message(self.deployed) }
}

/// "Successfully deployed to 1 container" / "... to N containers".
pub fn deployment_message(count: usize) -> String {
    let noun = if count == 1 { "container" } else { "containers" };
    format!("Successfully deployed to {} {}", count, noun)
}

pub struct ConfigDeploymentCoordinator {
    store: SharedStore,
    engine: Arc<dyn EngineClient>,
    options: DeployOptions,
}

impl ConfigDeploymentCoordinator {
    pub fn new(store: SharedStore, engine: Arc<dyn EngineClient>, options: DeployOptions) -> Self {
        Self { store, engine, options }
    }

    /// Write `filename` (the user's stored content, else its default template) into
    /// every running container `user` owns.
    pub async fn deploy(&self, user: &str, filename: &str) -> Result<DeploymentReport, DeployError> {
        let template = configurations::default_template(filename)
            .ok_or_else(|| DeployError::UnknownFile(filename.to_string()))?;
        let record = self
            .store
            .user(user)
            .ok_or_else(|| DeployError::UserNotFound(user.to_string()))?;
        let content = record
            .configurations
            .get(filename)
            .cloned()
            .unwrap_or_else(|| template.to_string());

        let targets = self.enumerate(user).await?;
        if targets.is_empty() {
            info!(target: "deploy", user, file = filename, "no running containers, nothing to deploy");
            return Ok(DeploymentReport::default());
        }

        let path = format!("{}/{}", self.options.container_home.trim_end_matches('/'), filename);
        let permits = self.options.concurrency.unwrap_or(targets.len()).clamp(1, Semaphore::MAX_PERMITS);
        let limit = Semaphore::new(permits);
        let results = join_all(targets.into_iter().map(|(host, container)| {
            let (limit, path, content) = (&limit, path.as_str(), content.as_str());
            async move {
                let res = match limit.acquire().await {
                    Ok(_permit) => self.write_one(&host, &container, path, content).await,
                    Err(e) => Err(EngineError::Unreachable(e.to_string())),
                };
                (host, container, res)
            }
        }))
        .await;

        let mut report = DeploymentReport::default();
        for (host, container, res) in results {
            match res {
                Ok(()) => report.deployed += 1,
                Err(e) => {
                    warn!(target: "deploy", user, hostname = %host.hostname, container = %container.id, error = %e, "configuration write failed");
                    report.failed.push(FailedWrite {
                        hostname: host.hostname,
                        container: container.id.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(target: "deploy", user, file = filename, deployed = report.deployed, failed = report.failed.len(), "deployment finished");
        Ok(report)
    }

    async fn write_one(&self, host: &HostRecord, container: &Container, path: &str, content: &str) -> Result<(), EngineError> {
        match tokio::time::timeout(self.options.timeout, self.engine.write_file(host, &container.id, path, content)).await {
            Ok(res) => res,
            Err(_) => Err(EngineError::Timeout(self.options.timeout.as_millis() as u64)),
        }
    }

    /// Running containers of `user` on every host that answered.
    async fn enumerate(&self, user: &str) -> Result<Vec<(HostRecord, Container)>, DeployError> {
        let hosts = self.store.hosts();
        if hosts.is_empty() {
            return Ok(Vec::new());
        }
        let listings = join_all(hosts.iter().map(|host| async move {
            let listed = tokio::time::timeout(self.options.timeout, self.engine.running_containers(host, user)).await;
            match listed {
                Ok(res) => res,
                Err(_) => Err(EngineError::Timeout(self.options.timeout.as_millis() as u64)),
            }
        }))
        .await;

        let mut targets = Vec::new();
        let mut last_error = None;
        let mut answered = 0usize;
        for (host, listing) in hosts.iter().zip(listings) {
            match listing {
                Ok(containers) => {
                    answered += 1;
                    debug!(target: "deploy", hostname = %host.hostname, containers = containers.len(), "host listed");
                    targets.extend(containers.into_iter().map(|c| (host.clone(), c)));
                }
                Err(e) => {
                    warn!(target: "deploy", hostname = %host.hostname, error = %e, "skipping host, container listing failed");
                    last_error = Some(e);
                }
            }
        }
        if answered == 0 {
            let last = last_error.map(|e| e.to_string()).unwrap_or_default();
            return Err(DeployError::Enumeration { hosts: hosts.len(), last });
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ContainerId, MemoryEngine, PortMapping, Protocol};
    use serde_json::Map;

    const USER: &str = "ada@example.com";

    fn cid(n: u8) -> ContainerId {
        format!("{:016x}", 0xabc0_0000_0000_0000u64 + n as u64).parse().unwrap()
    }

    fn container(host: &str, n: u8, owner: &str, running: bool) -> Container {
        Container {
            id: cid(n),
            hostname: host.to_string(),
            owner: Some(owner.to_string()),
            running,
            ports: vec![PortMapping { internal: 22, external: 32000 + n as u16, protocol: Protocol::Tcp }],
        }
    }

    fn setup(hosts: &[&str]) -> (SharedStore, Arc<MemoryEngine>) {
        let store = SharedStore::in_memory();
        for h in hosts {
            store.upsert_host(h, Map::new()).unwrap();
        }
        store.create_user(USER, None, false).unwrap();
        (store, Arc::new(MemoryEngine::new()))
    }

    fn coordinator(store: &SharedStore, engine: &Arc<MemoryEngine>, options: DeployOptions) -> ConfigDeploymentCoordinator {
        ConfigDeploymentCoordinator::new(store.clone(), engine.clone(), options)
    }

    #[test]
    fn message_pluralisation() {
        assert_eq!(deployment_message(0), "Successfully deployed to 0 containers");
        assert_eq!(deployment_message(1), "Successfully deployed to 1 container");
        assert_eq!(deployment_message(3), "Successfully deployed to 3 containers");
    }

    #[tokio::test]
    async fn zero_containers_is_zero_not_an_error() {
        let (store, engine) = setup(&["node1.example.com"]);
        let report = coordinator(&store, &engine, DeployOptions::default()).deploy(USER, ".bashrc").await.unwrap();
        assert_eq!(report.count(), 0);
        assert_eq!(report.message(), "Successfully deployed to 0 containers");
    }

    #[tokio::test]
    async fn no_hosts_is_zero() {
        let (store, engine) = setup(&[]);
        let report = coordinator(&store, &engine, DeployOptions::default()).deploy(USER, ".vimrc").await.unwrap();
        assert_eq!(report, DeploymentReport::default());
    }

    #[tokio::test]
    async fn single_container_gets_stored_content() {
        let (store, engine) = setup(&["node1.example.com"]);
        store
            .update_user::<_, crate::storage::StoreError, _>(USER, |u| {
                u.configurations.insert(".bashrc".into(), "export EDITOR=vim\n".into());
                Ok(())
            })
            .unwrap();
        engine.add_container(container("node1.example.com", 1, USER, true));
        engine.add_container(container("node1.example.com", 2, "someone@else.org", true));
        engine.add_container(container("node1.example.com", 3, USER, false));

        let report = coordinator(&store, &engine, DeployOptions::default()).deploy(USER, ".bashrc").await.unwrap();
        assert_eq!(report.message(), "Successfully deployed to 1 container");
        assert!(report.failed.is_empty());
        assert_eq!(
            engine.file("node1.example.com", &cid(1), "/home/user/.bashrc").as_deref(),
            Some("export EDITOR=vim\n")
        );
        assert!(engine.file("node1.example.com", &cid(2), "/home/user/.bashrc").is_none());
    }

    #[tokio::test]
    async fn missing_stored_file_deploys_default_template() {
        let (store, engine) = setup(&["node1.example.com"]);
        store
            .update_user::<_, crate::storage::StoreError, _>(USER, |u| {
                u.configurations.remove(".nanorc");
                Ok(())
            })
            .unwrap();
        engine.add_container(container("node1.example.com", 1, USER, true));
        coordinator(&store, &engine, DeployOptions::default()).deploy(USER, ".nanorc").await.unwrap();
        assert_eq!(
            engine.file("node1.example.com", &cid(1), "/home/user/.nanorc").as_deref(),
            configurations::default_template(".nanorc")
        );
    }

    #[tokio::test]
    async fn failing_container_is_reported_not_counted() {
        let (store, engine) = setup(&["node1.example.com", "node2.example.com"]);
        engine.add_container(container("node1.example.com", 1, USER, true));
        engine.add_container(container("node2.example.com", 2, USER, true));
        engine.fail_writes("node2.example.com", &cid(2));

        let opts = DeployOptions { concurrency: Some(1), ..DeployOptions::default() };
        let report = coordinator(&store, &engine, opts).deploy(USER, ".gitconfig").await.unwrap();
        assert_eq!(report.deployed, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].hostname, "node2.example.com");
        assert_eq!(report.failed[0].container, cid(2).to_string());
    }

    #[tokio::test]
    async fn slow_container_times_out() {
        let (store, engine) = setup(&["node1.example.com"]);
        engine.add_container(container("node1.example.com", 1, USER, true));
        engine.add_container(container("node1.example.com", 2, USER, true));
        engine.delay_writes("node1.example.com", &cid(2), Duration::from_secs(60));

        let opts = DeployOptions { timeout: Duration::from_millis(100), ..DeployOptions::default() };
        let report = coordinator(&store, &engine, opts).deploy(USER, ".vimrc").await.unwrap();
        assert_eq!(report.deployed, 1);
        assert!(report.failed[0].reason.contains("timed out"));
    }

    fn slow_targets(engine: &MemoryEngine, n: u8, delay: Duration) {
        for i in 1..=n {
            engine.add_container(container("node1.example.com", i, USER, true));
            engine.delay_writes("node1.example.com", &cid(i), delay);
        }
    }

    #[tokio::test]
    async fn concurrency_cap_queues_writes() {
        let (store, engine) = setup(&["node1.example.com"]);
        slow_targets(&engine, 4, Duration::from_millis(80));

        // The timeout starts once a write holds its permit.
        let opts = DeployOptions { concurrency: Some(1), timeout: Duration::from_millis(200), ..DeployOptions::default() };
        let started = std::time::Instant::now();
        let report = coordinator(&store, &engine, opts).deploy(USER, ".bashrc").await.unwrap();
        assert_eq!(report.deployed, 4);
        assert!(report.failed.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(320));
    }

    #[tokio::test]
    async fn unbounded_writes_run_together() {
        let (store, engine) = setup(&["node1.example.com"]);
        slow_targets(&engine, 4, Duration::from_millis(200));

        let started = std::time::Instant::now();
        let report = coordinator(&store, &engine, DeployOptions::default()).deploy(USER, ".bashrc").await.unwrap();
        assert_eq!(report.deployed, 4);
        assert!(started.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn oversized_concurrency_is_clamped() {
        let (store, engine) = setup(&["node1.example.com"]);
        engine.add_container(container("node1.example.com", 1, USER, true));
        let opts = DeployOptions { concurrency: Some(usize::MAX), ..DeployOptions::default() };
        let report = coordinator(&store, &engine, opts).deploy(USER, ".bashrc").await.unwrap();
        assert_eq!(report.deployed, 1);
    }

    #[tokio::test]
    async fn unreachable_host_is_skipped() {
        let (store, engine) = setup(&["node1.example.com", "node2.example.com"]);
        engine.add_container(container("node1.example.com", 1, USER, true));
        engine.set_unreachable("node2.example.com", true);
        let report = coordinator(&store, &engine, DeployOptions::default()).deploy(USER, ".hgrc").await.unwrap();
        assert_eq!(report.deployed, 1);
    }

    #[tokio::test]
    async fn all_hosts_unreachable_fails_deployment() {
        let (store, engine) = setup(&["node1.example.com", "node2.example.com"]);
        engine.set_unreachable("node1.example.com", true);
        engine.set_unreachable("node2.example.com", true);
        let err = coordinator(&store, &engine, DeployOptions::default()).deploy(USER, ".bashrc").await.unwrap_err();
        assert!(matches!(err, DeployError::Enumeration { hosts: 2, .. }));
    }

    #[tokio::test]
    async fn unknown_file_and_user_are_rejected() {
        let (store, engine) = setup(&["node1.example.com"]);
        let c = coordinator(&store, &engine, DeployOptions::default());
        assert!(matches!(c.deploy(USER, ".profile").await, Err(DeployError::UnknownFile(_))));
        assert!(matches!(c.deploy("ghost@example.com", ".bashrc").await, Err(DeployError::UserNotFound(_))));
    }
}
