//! Per-user handlers: profile, configuration files, deployments, delegations, and
//! administrator-managed account creation.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::{parse_json, validate_hostname, AppState};
use crate::configurations;
use crate::deploy::FailedWrite;
use crate::error::{AppError, AppResult};
use crate::identity::{authorize, Action, CapabilitySet, Identity, Resource, Target};
use crate::patch::{apply_patch, apply_to_configurations, parse_patch};
use crate::security;
use crate::storage::DelegationRecord;

/// Account behind the request's session, authorized for its own data.
fn session_user(state: &AppState, headers: &HeaderMap, action: Action) -> AppResult<String> {
    let identity = state.identify(headers, Target::none());
    let user = match identity.session_user() {
        Some(u) => u.to_string(),
        None => return Err(AppError::unauthorized("unauthorized".to_string(), "a user session is required".to_string())),
    };
    authorize(&identity, Resource::UserData(&user), action).into_result("user data")?;
    Ok(user)
}

fn known_file(file: &str) -> AppResult<&'static str> {
    configurations::default_template(file).ok_or_else(|| {
        AppError::validation("unknown_configuration".to_string(), format!("configuration file not allowed: {}", file))
    })
}

pub async fn get_profile(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Map<String, Value>>> {
    let user = session_user(&state, &headers, Action::Read)?;
    let record = state.store.user(&user).ok_or_else(|| AppError::not_found("user_not_found".to_string(), user.clone()))?;
    Ok(Json(record.profile))
}

/// Apply an RFC 6902 patch to the caller's profile. No key restrictions apply.
pub async fn patch_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Map<String, Value>>> {
    let user = session_user(&state, &headers, Action::Update)?;
    let patch = parse_patch(&body)?;
    let profile = state.store.update_user(&user, |u| -> AppResult<_> {
        let updated = apply_patch(&u.profile, None, &patch)?;
        u.profile = updated.clone();
        Ok(updated)
    })?;
    info!(user = %user, ops = patch.0.len(), "profile patched");
    Ok(Json(profile))
}

pub async fn get_configurations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<BTreeMap<String, String>>> {
    let user = session_user(&state, &headers, Action::Read)?;
    let record = state.store.user(&user).ok_or_else(|| AppError::not_found("user_not_found".to_string(), user.clone()))?;
    Ok(Json(record.configurations))
}

/// Patch the caller's configuration files. Any operation outside the whitelist
/// rejects the whole batch and leaves the stored files untouched.
pub async fn patch_configurations(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<BTreeMap<String, String>>> {
    let user = session_user(&state, &headers, Action::Update)?;
    let patch = parse_patch(&body)?;
    let whitelist = configurations::whitelist();
    let updated = state.store.update_user(&user, |u| -> AppResult<_> {
        let updated = apply_to_configurations(&u.configurations, &whitelist, configurations::MAX_FILE_BYTES, &patch)?;
        u.configurations = updated.clone();
        Ok(updated)
    })?;
    info!(user = %user, ops = patch.0.len(), "configurations patched");
    Ok(Json(updated))
}

/// Put a configuration file back to its default template.
pub async fn reset_configuration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file): Path<String>,
) -> AppResult<StatusCode> {
    let user = session_user(&state, &headers, Action::Delete)?;
    let template = known_file(&file)?;
    state.store.update_user(&user, |u| -> AppResult<_> {
        u.configurations.insert(file.clone(), template.to_string());
        Ok(())
    })?;
    info!(user = %user, file = %file, "configuration reset to default");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub message: String,
    pub deployed: usize,
    pub failed: Vec<FailedWrite>,
}

/// Write one configuration file into every running container the caller owns.
pub async fn deploy_configuration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file): Path<String>,
) -> AppResult<Json<DeployResponse>> {
    let user = session_user(&state, &headers, Action::Update)?;
    known_file(&file)?;
    let report = state.deployer.deploy(&user, &file).await?;
    Ok(Json(DeployResponse { message: report.message(), deployed: report.count(), failed: report.failed }))
}

#[derive(Debug, Deserialize)]
pub struct DelegationRequest {
    pub hostname: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DelegationView {
    pub token: String,
    pub hostname: String,
    pub scopes: CapabilitySet,
}

/// Issue a bearer token that lets `hostname` act for the caller within `scopes`.
pub async fn create_delegation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<DelegationView>)> {
    let user = session_user(&state, &headers, Action::Create)?;
    let req: DelegationRequest = parse_json(&body)?;
    let hostname = validate_hostname(&req.hostname)?;
    let scopes = CapabilitySet::parse(&req.scopes)
        .map_err(|e| AppError::validation("unknown_scope".to_string(), e.to_string()))?;
    if scopes.is_empty() {
        return Err(AppError::validation("empty_scope".to_string(), "at least one scope is required".to_string()));
    }

    let token = security::random_token()?;
    let record = DelegationRecord { user: user.clone(), hostname: hostname.clone(), scopes: scopes.clone(), issued_at: Utc::now() };
    state.store.insert_delegation(&token, record)?;
    info!(target: "auth", user = %user, hostname = %hostname, "delegation issued");
    Ok((StatusCode::CREATED, Json(DelegationView { token, hostname, scopes })))
}

#[derive(Debug, Deserialize)]
pub struct AccountRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Serialize)]
pub struct AccountView {
    pub username: String,
    pub admin: bool,
}

/// Administrator-only account creation. New accounts start with default configurations.
pub async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<AccountView>)> {
    let identity = state.identify(&headers, Target::none());
    authorize(&identity, Resource::UserAccounts, Action::Create).into_result("user accounts")?;
    let req: AccountRequest = parse_json(&body)?;
    let username = req.username.trim();
    if username.is_empty() || username.chars().any(char::is_whitespace) {
        return Err(AppError::validation("invalid_username".to_string(), format!("invalid username: {:?}", req.username)));
    }
    if req.password.is_empty() {
        return Err(AppError::validation("invalid_password".to_string(), "password must not be empty".to_string()));
    }
    let hash = security::hash_password(&req.password)?;
    let record = state.store.create_user(username, Some(hash), req.admin)?;
    if let Identity::AdminUser(by) = &identity {
        info!(target: "auth", username = %record.username, admin = record.admin, by = %by, "account created");
    }
    Ok((StatusCode::CREATED, Json(AccountView { username: record.username, admin: record.admin })))
}
