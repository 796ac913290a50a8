//! Unified application error model and mapping helpers.
//! Every HTTP handler returns `AppResult<T>`; component errors (store, engine, patch,
//! deployment) convert into `AppError` at the boundary and nowhere else.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::deploy::DeployError;
use crate::engine::EngineError;
use crate::patch::PatchError;
use crate::security::SecurityError;
use crate::storage::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// No identity valid for the requested action.
    Unauthorized { code: String, message: String },
    /// Password login failed.
    Unauthenticated { code: String, message: String },
    /// Resource absent, or deliberately hidden from the caller.
    NotFound { code: String, message: String },
    /// Malformed input, bad hostname/container id, disallowed configuration key.
    Validation { code: String, message: String },
    /// A remote engine could not be queried. Rendered as a not-found style response.
    UpstreamUnreachable { code: String, message: String },
    /// Persistence or remote-write failure.
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Unauthorized { code, .. }
            | AppError::Unauthenticated { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Validation { code, .. }
            | AppError::UpstreamUnreachable { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Unauthorized { message, .. }
            | AppError::Unauthenticated { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Validation { message, .. }
            | AppError::UpstreamUnreachable { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn unauthorized<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthorized { code: code.into(), message: msg.into() } }
    pub fn unauthenticated<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthenticated { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn upstream<S: Into<String>>(code: S, msg: S) -> Self { AppError::UpstreamUnreachable { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Unauthorized { .. } => 403,
            AppError::Unauthenticated { .. } => 401,
            AppError::NotFound { .. } => 404,
            AppError::Validation { .. } => 400,
            // An unreachable engine is indistinguishable from an unknown host to the caller.
            AppError::UpstreamUnreachable { .. } => 404,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = self.code_str(), "{}", self.message());
        } else {
            tracing::debug!(code = self.code_str(), status = status.as_u16(), "{}", self.message());
        }
        let body = serde_json::json!({
            "status": "error",
            "code": self.code_str(),
            "message": self.message(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::HostNotFound(h) => AppError::not_found("host_not_found".to_string(), format!("host not found: {}", h)),
            StoreError::UserNotFound(u) => AppError::not_found("user_not_found".to_string(), format!("user not found: {}", u)),
            StoreError::UserExists(u) => AppError::validation("user_exists".to_string(), format!("user already exists: {}", u)),
            other => AppError::internal("store_error".to_string(), other.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::UpstreamUnreachable { code: "engine_unreachable".into(), message: err.to_string() }
    }
}

impl From<PatchError> for AppError {
    fn from(err: PatchError) -> Self {
        let code = match &err {
            PatchError::Parse(_) => "bad_patch_json",
            PatchError::DisallowedKey(_) => "disallowed_key",
            PatchError::Apply(_) => "patch_failed",
            PatchError::NotAMapping => "patch_not_mapping",
            PatchError::NonStringValue(_) => "patch_non_string",
            PatchError::TooLarge { .. } => "configuration_too_large",
        };
        AppError::Validation { code: code.into(), message: err.to_string() }
    }
}

impl From<DeployError> for AppError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::UnknownFile(_) => AppError::Validation { code: "unknown_configuration".into(), message: err.to_string() },
            DeployError::UserNotFound(_) => AppError::NotFound { code: "user_not_found".into(), message: err.to_string() },
            DeployError::Enumeration { .. } => AppError::Internal { code: "deploy_failed".into(), message: err.to_string() },
        }
    }
}

impl From<SecurityError> for AppError {
    fn from(err: SecurityError) -> Self {
        AppError::Internal { code: "security_error".into(), message: err.to_string() }
    }
}
