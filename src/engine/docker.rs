use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{Container, ContainerId, EngineClient, EngineError, EngineVersion, PortMapping, OWNER_LABEL};
use crate::storage::HostRecord;

/// Docker Engine HTTP API client shared across all hosts.
#[derive(Clone)]
pub struct DockerEngine {
    http: reqwest::Client,
    scheme: String,
    default_port: u16,
}

impl DockerEngine {
    pub fn new(scheme: &str, default_port: u16, request_timeout: Duration) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;
        Ok(Self { http, scheme: scheme.to_string(), default_port })
    }

    fn base_url(&self, host: &HostRecord) -> String {
        let port = host.engine_port().unwrap_or(self.default_port);
        format!("{}://{}:{}", self.scheme, host.hostname, port)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(EngineError::Status { status: status.as_u16(), body })
    }
}

#[derive(Debug, Deserialize)]
struct SummaryPort {
    #[serde(rename = "PrivatePort")]
    private_port: u16,
    #[serde(rename = "PublicPort", default)]
    public_port: Option<u16>,
    #[serde(rename = "Type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Labels", default)]
    labels: HashMap<String, String>,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Ports", default)]
    ports: Vec<SummaryPort>,
}

#[derive(Debug, Deserialize)]
struct HostBinding {
    #[serde(rename = "HostPort", default)]
    host_port: String,
}

#[derive(Debug, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "Ports", default)]
    ports: Option<HashMap<String, Option<Vec<HostBinding>>>>,
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Config")]
    config: InspectConfig,
    #[serde(rename = "State")]
    state: InspectState,
    #[serde(rename = "NetworkSettings")]
    network: InspectNetwork,
}

#[derive(Debug, Deserialize)]
struct ExecCreated {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ExecInspect {
    #[serde(rename = "ExitCode", default)]
    exit_code: Option<i64>,
    #[serde(rename = "Running", default)]
    running: bool,
}

fn parse_id(raw: &str) -> Result<ContainerId, EngineError> {
    raw.parse().map_err(|e: super::InvalidContainerId| EngineError::Decode(e.to_string()))
}

fn summary_to_container(hostname: &str, s: ContainerSummary) -> Result<Container, EngineError> {
    let mut ports = Vec::new();
    for p in s.ports {
        // Unpublished ports have no host side.
        let Some(external) = p.public_port else { continue; };
        ports.push(PortMapping { internal: p.private_port, external, protocol: p.kind.parse()? });
    }
    Ok(Container {
        id: parse_id(&s.id)?,
        hostname: hostname.to_string(),
        owner: s.labels.get(OWNER_LABEL).cloned(),
        running: s.state == "running",
        ports,
    })
}

fn inspect_to_container(hostname: &str, c: ContainerInspect) -> Result<Container, EngineError> {
    let mut ports = Vec::new();
    for (key, bindings) in c.network.ports.unwrap_or_default() {
        // keys look like "22/tcp"
        let (port, proto) = key
            .split_once('/')
            .ok_or_else(|| EngineError::Decode(format!("bad port key {}", key)))?;
        let internal: u16 = port.parse().map_err(|_| EngineError::Decode(format!("bad port key {}", key)))?;
        let protocol = proto.parse()?;
        let external = bindings
            .unwrap_or_default()
            .iter()
            .find_map(|b| b.host_port.parse::<u16>().ok());
        if let Some(external) = external {
            ports.push(PortMapping { internal, external, protocol });
        }
    }
    ports.sort_by_key(|p| (p.internal, p.protocol as u8));
    Ok(Container {
        id: parse_id(&c.id)?,
        hostname: hostname.to_string(),
        owner: c.config.labels.unwrap_or_default().get(OWNER_LABEL).cloned(),
        running: c.state.running,
        ports,
    })
}

/// Shell run inside the container; content and path arrive through the environment
/// so nothing user-controlled is ever spliced into the command line.
const WRITE_FILE_SCRIPT: &str =
    r#"mkdir -p "$(dirname "$FLEETGATE_PATH")" && printf '%s' "$FLEETGATE_CONTENT" | base64 -d > "$FLEETGATE_PATH""#;

#[async_trait]
impl EngineClient for DockerEngine {
    async fn version(&self, host: &HostRecord) -> Result<EngineVersion, EngineError> {
        let url = format!("{}/version", self.base_url(host));
        let resp = Self::check(self.http.get(&url).send().await?).await?;
        Ok(resp.json::<EngineVersion>().await?)
    }

    async fn running_containers(&self, host: &HostRecord, owner: &str) -> Result<Vec<Container>, EngineError> {
        let url = format!("{}/containers/json", self.base_url(host));
        let filters = json!({
            "label": [format!("{}={}", OWNER_LABEL, owner)],
            "status": ["running"],
        })
        .to_string();
        let resp = Self::check(self.http.get(&url).query(&[("filters", filters)]).send().await?).await?;
        let summaries: Vec<ContainerSummary> = resp.json().await?;
        summaries
            .into_iter()
            .map(|s| summary_to_container(&host.hostname, s))
            .collect()
    }

    async fn inspect_container(&self, host: &HostRecord, id: &ContainerId) -> Result<Option<Container>, EngineError> {
        let url = format!("{}/containers/{}/json", self.base_url(host), id);
        let resp = self.http.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let inspect: ContainerInspect = Self::check(resp).await?.json().await?;
        inspect_to_container(&host.hostname, inspect).map(Some)
    }

    async fn write_file(&self, host: &HostRecord, id: &ContainerId, path: &str, content: &str) -> Result<(), EngineError> {
        if content.len() > crate::configurations::MAX_FILE_BYTES {
            return Err(EngineError::TooLarge { size: content.len(), limit: crate::configurations::MAX_FILE_BYTES });
        }
        let base = self.base_url(host);
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        let create = json!({
            "AttachStdout": true,
            "AttachStderr": true,
            "Env": [format!("FLEETGATE_PATH={}", path), format!("FLEETGATE_CONTENT={}", encoded)],
            "Cmd": ["sh", "-c", WRITE_FILE_SCRIPT],
        });
        let resp = self
            .http
            .post(format!("{}/containers/{}/exec", base, id))
            .json(&create)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::NoSuchContainer(id.to_string()));
        }
        let exec: ExecCreated = Self::check(resp).await?.json().await?;

        // Without detaching, the start call returns once the command has finished.
        let started = self
            .http
            .post(format!("{}/exec/{}/start", base, exec.id))
            .json(&json!({ "Detach": false, "Tty": false }))
            .send()
            .await?;
        Self::check(started).await?.bytes().await?;

        let state: ExecInspect = Self::check(self.http.get(format!("{}/exec/{}/json", base, exec.id)).send().await?)
            .await?
            .json()
            .await?;
        match (state.running, state.exit_code) {
            (false, Some(0)) => {
                debug!(hostname = %host.hostname, container = %id, path, "file written");
                Ok(())
            }
            (false, Some(code)) => Err(EngineError::Exec(code)),
            _ => Err(EngineError::Decode("exec still running after start returned".into())),
        }
    }
}
