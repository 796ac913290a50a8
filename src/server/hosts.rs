//! Host registry handlers: `/hosts` and everything below it.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use super::{parse_json, validate_hostname, AppState};
use crate::engine::{ContainerId, EngineVersion, Protocol};
use crate::error::{AppError, AppResult};
use crate::identity::{authorize, Action, Capability, Grant, Identity, Resource, Target};
use crate::security::ClientCredential;

#[derive(Debug, Serialize)]
pub struct CredentialView {
    pub id: String,
    pub secret: String,
}

impl From<ClientCredential> for CredentialView {
    fn from(c: ClientCredential) -> Self {
        Self { id: c.id, secret: c.secret }
    }
}

#[derive(Debug, Serialize)]
pub struct PortView {
    pub port: u16,
    pub protocol: Protocol,
}

fn host_not_found(hostname: &str) -> AppError {
    AppError::not_found("host_not_found".to_string(), format!("host not found: {}", hostname))
}

pub async fn list_hosts(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Vec<String>>> {
    let identity = state.identify(&headers, Target::none());
    authorize(&identity, Resource::HostList, Action::Read).into_result("host list")?;
    Ok(Json(state.store.hostnames()))
}

pub async fn get_host(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hostname): Path<String>,
) -> AppResult<Json<Map<String, Value>>> {
    let hostname = validate_hostname(&hostname)?;
    let identity = state.identify(&headers, Target::host(&hostname));
    authorize(&identity, Resource::Host(&hostname), Action::Read).into_result("host")?;
    let host = state.store.host(&hostname).ok_or_else(|| host_not_found(&hostname))?;
    Ok(Json(host.properties))
}

/// Create (201) or update (200) a host's properties. The body must be a JSON object.
pub async fn post_host(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hostname): Path<String>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<Map<String, Value>>)> {
    let hostname = validate_hostname(&hostname)?;
    let identity = state.identify(&headers, Target::host(&hostname));
    let action = if state.store.host(&hostname).is_some() { Action::Update } else { Action::Create };
    authorize(&identity, Resource::Host(&hostname), action).into_result("host")?;
    let properties: Map<String, Value> = parse_json(&body)?;

    let upsert = state.store.upsert_host(&hostname, properties)?;
    let status = if upsert.created { StatusCode::CREATED } else { StatusCode::OK };
    info!(hostname = %hostname, by = identity.kind(), created = upsert.created, version = upsert.record.version, "host saved");
    Ok((status, Json(upsert.record.properties)))
}

pub async fn delete_host(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hostname): Path<String>,
) -> AppResult<StatusCode> {
    let hostname = validate_hostname(&hostname)?;
    let identity = state.identify(&headers, Target::host(&hostname));
    authorize(&identity, Resource::Host(&hostname), Action::Delete).into_result("host")?;
    state.store.remove_host(&hostname)?;
    info!(hostname = %hostname, "host removed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_credentials(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hostname): Path<String>,
) -> AppResult<Json<CredentialView>> {
    let hostname = validate_hostname(&hostname)?;
    let identity = state.identify(&headers, Target::host(&hostname));
    authorize(&identity, Resource::HostCredentials(&hostname), Action::Read).into_result("host")?;
    let host = state.store.host(&hostname).ok_or_else(|| host_not_found(&hostname))?;
    Ok(Json(host.credential.into()))
}

/// Rotate the client secret; the client id is kept.
pub async fn reset_credentials(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hostname): Path<String>,
) -> AppResult<Json<CredentialView>> {
    let hostname = validate_hostname(&hostname)?;
    let identity = state.identify(&headers, Target::host(&hostname));
    authorize(&identity, Resource::HostCredentials(&hostname), Action::Update).into_result("host")?;
    let credential = state.store.reset_host_secret(&hostname)?;
    info!(hostname = %hostname, "host client secret reset");
    Ok(Json(credential.into()))
}

pub async fn get_version(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hostname): Path<String>,
) -> AppResult<Json<EngineVersion>> {
    let hostname = validate_hostname(&hostname)?;
    let identity = state.identify(&headers, Target::host(&hostname));
    authorize(&identity, Resource::HostVersion(&hostname), Action::Read).into_result("host")?;
    let host = state.store.host(&hostname).ok_or_else(|| host_not_found(&hostname))?;
    Ok(Json(state.engine.version(&host).await?))
}

/// External port and protocol for one internal port of a container.
///
/// The container id is checked before anything else is looked up. Delegated callers
/// only see containers owned by the delegating user.
pub async fn get_port(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((hostname, container, port)): Path<(String, String, String)>,
) -> AppResult<Json<PortView>> {
    let id: ContainerId = container
        .parse()
        .map_err(|e: crate::engine::InvalidContainerId| AppError::validation("invalid_container_id".to_string(), e.to_string()))?;
    let hostname = validate_hostname(&hostname)?;
    let internal: u16 = port
        .parse()
        .map_err(|_| AppError::validation("invalid_port".to_string(), format!("invalid port: {:?}", port)))?;

    let identity = state.identify(&headers, Target::host(&hostname).with_capability(Capability::UserPorts));
    let grant = authorize(&identity, Resource::ContainerPorts(&hostname), Action::Read).into_result("container ports")?;

    let host = state.store.host(&hostname).ok_or_else(|| host_not_found(&hostname))?;
    let found = state
        .engine
        .inspect_container(&host, &id)
        .await?
        .ok_or_else(|| AppError::not_found("container_not_found".to_string(), format!("container not found: {}", id)))?;

    if let (Grant::Scoped(_), Identity::Delegated { user, .. }) = (&grant, &identity) {
        if found.owner.as_deref() != Some(user.as_str()) {
            return Err(AppError::unauthorized(
                "unauthorized".to_string(),
                format!("container {} is not owned by the delegating user", id),
            ));
        }
    }

    let mapping = found
        .port(internal)
        .ok_or_else(|| AppError::not_found("port_not_found".to_string(), format!("port {} is not published", internal)))?;
    Ok(Json(PortView { port: mapping.external, protocol: mapping.protocol }))
}
